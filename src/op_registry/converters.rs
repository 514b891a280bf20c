//! Converters for operators whose conversion depends on the operator version
//! or which need more than the generic treatment.

use onnx_import_ir::{Attribute, Dim, ElementType, TensorType, Type};

use super::shape_rules::resolve_axis;
use super::{ConvertContext, ConvertResult};
use crate::attrs::{AttrKind, AttrValue};
use crate::error::{conversion_error, ImportError};
use crate::types::{element_type, int_constant, tensor_type};

/// Convert a node to a `torch.operator` op, keeping its attributes as-is.
pub fn generic(ctx: &mut ConvertContext) -> ConvertResult {
    ctx.emit_operator(&[])
}

/// Converter for `Softmax`, `LogSoftmax` and `Hardmax`.
///
/// Before opset 13 these operators coerce the input to 2D around `axis`,
/// which defaults to 1. From opset 13 they operate along `axis`, which
/// defaults to -1.
pub fn softmax(ctx: &mut ConvertContext) -> ConvertResult {
    let axis = if ctx.since_version() < 13 { 1 } else { -1 };
    ctx.emit_operator(&[("axis", Attribute::Int(axis))])
}

pub fn concat(ctx: &mut ConvertContext) -> ConvertResult {
    // `axis` is optional before opset 4 and defaults to 1.
    if ctx.since_version() < 4 {
        return ctx.emit_operator(&[("axis", Attribute::Int(1))]);
    }
    ctx.attrs().int("axis")?;
    ctx.emit_operator(&[])
}

pub fn cast(ctx: &mut ConvertContext) -> ConvertResult {
    let to = ctx.attrs().int("to")?;
    i32::try_from(to)
        .ok()
        .and_then(|code| element_type(code).ok())
        .ok_or_else(|| conversion_error!("Cast target type {} is not a known element type", to))?;
    ctx.emit_operator(&[])
}

/// Attributes which can specify the value of a `Constant` node.
const CONSTANT_VALUE_ATTRS: [&str; 8] = [
    "value",
    "value_float",
    "value_floats",
    "value_int",
    "value_ints",
    "value_string",
    "value_strings",
    "sparse_value",
];

pub fn constant(ctx: &mut ConvertContext) -> ConvertResult {
    let attrs = ctx.attrs();
    let present: Vec<&str> = CONSTANT_VALUE_ATTRS
        .into_iter()
        .filter(|name| attrs.contains(name))
        .collect();
    let name = match present.as_slice() {
        [name] => *name,
        [] => return Err(conversion_error!("Constant node has no value attribute")),
        names => {
            return Err(conversion_error!(
                "Constant node has multiple value attributes ({})",
                names.join(", ")
            ));
        }
    };

    let list_len = |kind: AttrKind| -> Result<i64, ImportError> {
        let len = match attrs.get(name, kind)? {
            AttrValue::Floats(xs) => xs.len(),
            AttrValue::Ints(xs) => xs.len(),
            AttrValue::Strings(xs) => xs.len(),
            _ => 0,
        };
        Ok(len as i64)
    };
    let scalar = |elem: ElementType| Type::Tensor(TensorType::new(elem, [0i64; 0]));

    let (ty, int_value) = match name {
        "value" => {
            let tensor = attrs.tensor(name)?;
            let ty = tensor_type(tensor).map_err(ImportError::conversion_failed)?;
            (ty, int_constant(tensor))
        }
        "value_float" => {
            attrs.get(name, AttrKind::Float)?;
            (scalar(ElementType::F32), None)
        }
        "value_floats" => (
            Type::tensor(ElementType::F32, [list_len(AttrKind::Floats)?]),
            None,
        ),
        "value_int" => {
            let value = attrs.int(name)?;
            (scalar(ElementType::SInt(64)), Some(vec![value]))
        }
        "value_ints" => {
            let values = attrs.ints(name)?;
            (
                Type::tensor(ElementType::SInt(64), [values.len() as i64]),
                Some(values.to_vec()),
            )
        }
        "value_string" => {
            attrs.string(name)?;
            (scalar(ElementType::String), None)
        }
        "value_strings" => (
            Type::tensor(ElementType::String, [list_len(AttrKind::Strings)?]),
            None,
        ),
        _ => return Err(conversion_error!("sparse constants are not supported")),
    };

    let ty = ctx.output_hint(0).cloned().unwrap_or(ty);
    let converted = ctx.emit_operator_with_types(&[], vec![ty])?;
    if let Some(values) = int_value {
        ctx.record_constant(0, values);
    }
    Ok(converted)
}

pub fn split(ctx: &mut ConvertContext) -> ConvertResult {
    let attrs = ctx.attrs();
    let since = ctx.since_version();
    let num_outputs = ctx.num_outputs();

    if since >= 13 && attrs.contains("split") {
        return Err(conversion_error!(
            "Split takes split sizes as an input from opset 13"
        ));
    }
    if since < 18 && attrs.contains("num_outputs") {
        return Err(conversion_error!(
            "Split attribute \"num_outputs\" requires opset 18"
        ));
    }

    let has_split_input = ctx.has_input(1);
    if since == 1 && has_split_input && attrs.contains("split") {
        return Err(conversion_error!(
            "Split takes either a split input or a split attribute, not both"
        ));
    }
    if (2..13).contains(&since) && has_split_input {
        return Err(conversion_error!(
            "Split takes split sizes as an attribute before opset 13"
        ));
    }
    if since >= 18 {
        match (has_split_input, attrs.contains("num_outputs")) {
            (true, true) => {
                return Err(conversion_error!(
                    "Split takes either a split input or a num_outputs attribute, not both"
                ));
            }
            (false, false) => {
                return Err(conversion_error!(
                    "Split requires a split input or a num_outputs attribute"
                ));
            }
            (false, true) => {
                let n = attrs.int("num_outputs")?;
                if n != num_outputs as i64 {
                    return Err(conversion_error!(
                        "Split has num_outputs = {} but the node has {} outputs",
                        n,
                        num_outputs
                    ));
                }
            }
            (true, false) => {}
        }
    }

    // Split-1 accepts sizes as either an input or an attribute.
    let sizes = if since < 13 && !has_split_input {
        attrs.ints_opt("split")?
    } else {
        ctx.constant_input(1)
    };
    if let Some(sizes) = sizes {
        if sizes.len() != num_outputs {
            return Err(conversion_error!(
                "Split has {} split sizes but the node has {} outputs",
                sizes.len(),
                num_outputs
            ));
        }
        check_split_total(ctx, sizes)?;
    }

    // Every output has the rank of the input.
    let same_rank = ctx.input_type(0).and_then(|ty| ty.as_tensor()).map(|input| {
        Type::Tensor(TensorType {
            dims: input
                .rank()
                .map(|rank| std::iter::repeat(Dim::Dynamic).take(rank).collect()),
            elem: input.elem,
        })
    });
    let result_types = ctx.result_types_or(|_| same_rank.clone())?;
    ctx.emit_operator_with_types(&[("axis", Attribute::Int(0))], result_types)
}

/// Check that split sizes add up to the size of the split dimension, if it is
/// known.
fn check_split_total(ctx: &ConvertContext, sizes: &[i64]) -> Result<(), ImportError> {
    let Some(dims) = ctx
        .input_type(0)
        .and_then(|ty| ty.as_tensor())
        .and_then(|input| input.dims())
    else {
        return Ok(());
    };
    let axis = resolve_axis(dims.len(), ctx.attrs().int_or("axis", 0))?;
    let Dim::Fixed(size) = dims[axis] else {
        return Ok(());
    };
    let total = sizes
        .iter()
        .try_fold(0i64, |acc, &s| acc.checked_add(s))
        .ok_or_else(|| conversion_error!("Split sizes overflow"))?;
    if total != size {
        return Err(conversion_error!(
            "Split sizes add up to {} but dimension {} has size {}",
            total,
            axis,
            size
        ));
    }
    Ok(())
}

/// Check that a node passes axes in the form used by its operator version.
///
/// Axes are an attribute before `axes_input_since` and an optional input
/// from that version onwards.
fn check_axes_form(
    ctx: &ConvertContext,
    axes_input_since: i64,
    required: bool,
) -> Result<(), ImportError> {
    let op_type = ctx.op_type();
    let attrs = ctx.attrs();

    if ctx.since_version() < axes_input_since {
        if ctx.has_input(1) {
            return Err(conversion_error!(
                "{} takes axes as an attribute before opset {}",
                op_type,
                axes_input_since
            ));
        }
        if required {
            attrs.ints("axes")?;
        }
    } else {
        if attrs.contains("axes") {
            return Err(conversion_error!(
                "{} takes axes as an input from opset {}",
                op_type,
                axes_input_since
            ));
        }
        if required && !ctx.has_input(1) {
            return Err(conversion_error!("{} requires an axes input", op_type));
        }
    }
    Ok(())
}

pub fn unsqueeze(ctx: &mut ConvertContext) -> ConvertResult {
    check_axes_form(ctx, 13, true)?;
    ctx.emit_operator(&[])
}

pub fn squeeze(ctx: &mut ConvertContext) -> ConvertResult {
    check_axes_form(ctx, 13, false)?;
    ctx.emit_operator(&[])
}

/// Create a converter for a `Reduce*` operator which takes axes as an input
/// from opset `axes_input_since`.
pub fn reduce(
    axes_input_since: i64,
) -> impl Fn(&mut ConvertContext) -> ConvertResult + Send + Sync + 'static {
    move |ctx| {
        check_axes_form(ctx, axes_input_since, false)?;
        if ctx.since_version() < axes_input_since && ctx.attrs().contains("noop_with_empty_axes") {
            return Err(conversion_error!(
                "{} attribute \"noop_with_empty_axes\" requires opset {}",
                ctx.op_type(),
                axes_input_since
            ));
        }
        ctx.emit_operator(&[("keepdims", Attribute::Int(1))])
    }
}
