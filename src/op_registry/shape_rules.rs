//! Declarative type and shape inference rules for operator outputs.
//!
//! Many ONNX operators share the same shape behavior, so there is an M:1
//! mapping between operators and rules. A rule only determines the type of an
//! operator's first output. When the inputs don't carry enough information to
//! determine the output type, rules return `None` and the caller falls back
//! to other sources of type information.

use onnx_import_ir::{Dim, Dims, ElementType, TensorType, Type};
use smallvec::SmallVec;

use crate::attrs::AttributeDict;
use crate::error::{conversion_error, ImportError};
use crate::types::element_type;

/// Shape inference rule for an operator's first output.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeRule {
    /// Output has the same type as the input at a given index.
    SameAsInput(usize),

    /// Output has the element type and rank of the input at a given index,
    /// but dimension sizes are unknown.
    SameRankAs(usize),

    /// Output shape is the result of broadcasting all inputs together.
    ///
    /// The element type is taken from the first non-boolean input.
    Broadcast,

    /// As [`ShapeRule::Broadcast`] but the output is boolean.
    BroadcastBool,

    /// Matrix multiplication with broadcasting of batch dimensions.
    MatMul,

    /// 2D matrix multiplication with optional transposition of inputs.
    Gemm,

    /// Permute dimensions according to the `perm` attribute.
    Transpose,

    /// Reduce over axes given by an `axes` attribute or constant input.
    Reduce,

    /// Join inputs along the `axis` attribute.
    Concat,

    /// Output has the input's shape and the element type of the `to`
    /// attribute.
    CastTo,

    /// Output is a vector of the input's dimension sizes.
    Shape,

    /// Insert 1-sized dimensions.
    Unsqueeze,

    /// Remove 1-sized dimensions.
    Squeeze,

    /// Flatten input into a matrix.
    Flatten,
}

/// Information about an operator's inputs available to shape rules.
pub struct ShapeInputs<'a, 'd> {
    /// Types of inputs. `None` for absent inputs.
    pub types: Vec<Option<&'a Type>>,

    /// Values of inputs which are integer constants.
    pub constants: Vec<Option<&'a [i64]>>,

    pub attrs: &'a AttributeDict<'d>,

    /// Since-version of the operator schema the node was converted with.
    pub since_version: i64,
}

impl ShapeInputs<'_, '_> {
    fn tensor(&self, index: usize) -> Option<&TensorType> {
        self.types.get(index).copied().flatten().and_then(|t| t.as_tensor())
    }

    fn constant(&self, index: usize) -> Option<&[i64]> {
        self.constants.get(index).copied().flatten()
    }

    /// Return true if the input at `index` is present.
    fn has_input(&self, index: usize) -> bool {
        self.types.get(index).is_some_and(|t| t.is_some())
    }

    /// Return the present tensor inputs, or `None` if any input is not a
    /// tensor.
    fn all_tensors(&self) -> Option<Vec<&TensorType>> {
        self.types
            .iter()
            .flatten()
            .map(|t| t.as_tensor())
            .collect()
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to a zero-based
/// dimension index.
pub(super) fn resolve_axis(ndim: usize, axis: i64) -> Result<usize, ImportError> {
    let len = ndim as i64;
    if axis < -len || axis >= len {
        return Err(conversion_error!(
            "axis {} is out of range for rank {}",
            axis,
            ndim
        ));
    }
    Ok(if axis >= 0 { axis } else { len + axis } as usize)
}

fn resolve_axes(ndim: usize, axes: &[i64]) -> Result<SmallVec<[usize; 4]>, ImportError> {
    let mut resolved: SmallVec<[usize; 4]> = SmallVec::with_capacity(axes.len());
    for &axis in axes {
        let axis = resolve_axis(ndim, axis)?;
        if resolved.contains(&axis) {
            return Err(conversion_error!("axis {} is repeated", axis));
        }
        resolved.push(axis);
    }
    Ok(resolved)
}

fn fmt_dims(dims: &[Dim]) -> String {
    let dims: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

/// Broadcast two shapes together following ONNX's
/// [broadcasting rules](https://onnx.ai/onnx/repo-docs/Broadcasting.html).
fn broadcast_dims(a: &[Dim], b: &[Dim]) -> Result<Dims, ImportError> {
    let a_pad = b.len().saturating_sub(a.len());
    let b_pad = a.len().saturating_sub(b.len());

    let a_iter = std::iter::repeat(&Dim::Fixed(1)).take(a_pad).chain(a);
    let b_iter = std::iter::repeat(&Dim::Fixed(1)).take(b_pad).chain(b);

    let mut out = Dims::with_capacity(a_pad + a.len());
    for (&x, &y) in a_iter.zip(b_iter) {
        let dim = match (x, y) {
            (x, y) if x == y => x,

            // If either size is 1, it will be broadcast against the other.
            (Dim::Fixed(1), y) => y,
            (x, Dim::Fixed(1)) => x,

            (Dim::Fixed(_), Dim::Fixed(_)) => {
                return Err(conversion_error!(
                    "cannot broadcast shapes {} and {}",
                    fmt_dims(a),
                    fmt_dims(b)
                ));
            }

            // Execution can only succeed if the dynamic size matches the
            // fixed size, which is not 1.
            (Dim::Dynamic, Dim::Fixed(size)) | (Dim::Fixed(size), Dim::Dynamic) => {
                Dim::Fixed(size)
            }

            (Dim::Dynamic, Dim::Dynamic) => Dim::Dynamic,
        };
        out.push(dim);
    }
    Ok(out)
}

/// Multiply sizes of dimensions, or return `Dynamic` if any is dynamic.
fn product(dims: &[Dim]) -> Result<Dim, ImportError> {
    let mut size = 1i64;
    for dim in dims {
        let Dim::Fixed(dim_size) = dim else {
            return Ok(Dim::Dynamic);
        };
        size = size.checked_mul(*dim_size).ok_or_else(|| {
            conversion_error!("product of dimensions {} overflows", fmt_dims(dims))
        })?;
    }
    Ok(Dim::Fixed(size))
}

fn all_dynamic(rank: usize) -> Dims {
    std::iter::repeat(Dim::Dynamic).take(rank).collect()
}

impl ShapeRule {
    /// Infer the type of the first output of an operator.
    pub fn infer(&self, inputs: &ShapeInputs) -> Result<Option<Type>, ImportError> {
        let tensor = match self {
            Self::SameAsInput(index) => {
                return Ok(inputs.types.get(*index).copied().flatten().cloned());
            }
            Self::SameRankAs(index) => inputs.tensor(*index).map(|input| TensorType {
                dims: input.rank().map(all_dynamic),
                elem: input.elem,
            }),
            Self::Broadcast => infer_broadcast(inputs, None)?,
            Self::BroadcastBool => infer_broadcast(inputs, Some(ElementType::Bool))?,
            Self::MatMul => infer_matmul(inputs)?,
            Self::Gemm => infer_gemm(inputs)?,
            Self::Transpose => infer_transpose(inputs)?,
            Self::Reduce => infer_reduce(inputs)?,
            Self::Concat => infer_concat(inputs)?,
            Self::CastTo => {
                let to = inputs.attrs.int("to")?;
                let elem = element_type(to as i32).map_err(ImportError::conversion_failed)?;
                inputs.tensor(0).map(|input| TensorType {
                    dims: input.dims.clone(),
                    elem,
                })
            }
            Self::Shape => infer_shape(inputs),
            Self::Unsqueeze => infer_unsqueeze(inputs)?,
            Self::Squeeze => infer_squeeze(inputs)?,
            Self::Flatten => infer_flatten(inputs)?,
        };
        Ok(tensor.map(Type::Tensor))
    }
}

fn infer_broadcast(
    inputs: &ShapeInputs,
    out_elem: Option<ElementType>,
) -> Result<Option<TensorType>, ImportError> {
    let Some(tensors) = inputs.all_tensors() else {
        return Ok(None);
    };
    let Some(first) = tensors.first() else {
        return Ok(None);
    };
    let elem = out_elem.unwrap_or_else(|| {
        tensors
            .iter()
            .map(|t| t.elem)
            .find(|elem| *elem != ElementType::Bool)
            .unwrap_or(first.elem)
    });

    let mut dims: Option<Dims> = first.dims.clone();
    for tensor in &tensors[1..] {
        dims = match (dims, tensor.dims()) {
            (Some(a), Some(b)) => Some(broadcast_dims(&a, b)?),
            _ => None,
        };
    }
    Ok(Some(TensorType { dims, elem }))
}

fn infer_matmul(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let (Some(lhs), Some(rhs)) = (inputs.tensor(0), inputs.tensor(1)) else {
        return Ok(None);
    };
    let (Some(lhs_dims), Some(rhs_dims)) = (lhs.dims(), rhs.dims()) else {
        return Ok(Some(TensorType::unranked(lhs.elem)));
    };
    if lhs_dims.is_empty() || rhs_dims.is_empty() {
        return Err(conversion_error!("MatMul inputs must have rank >= 1"));
    }

    // Vector operands are promoted to matrices, and the inserted dimension
    // removed from the output.
    let lhs_vec = lhs_dims.len() == 1;
    let rhs_vec = rhs_dims.len() == 1;
    let lhs_dims: Dims = if lhs_vec {
        [Dim::Fixed(1), lhs_dims[0]].into_iter().collect()
    } else {
        lhs_dims.iter().copied().collect()
    };
    let rhs_dims: Dims = if rhs_vec {
        [rhs_dims[0], Dim::Fixed(1)].into_iter().collect()
    } else {
        rhs_dims.iter().copied().collect()
    };

    let lhs_batch = &lhs_dims[..lhs_dims.len() - 2];
    let rhs_batch = &rhs_dims[..rhs_dims.len() - 2];
    let mut dims = broadcast_dims(lhs_batch, rhs_batch)?;

    let k_lhs = lhs_dims[lhs_dims.len() - 1];
    let k_rhs = rhs_dims[rhs_dims.len() - 2];
    if let (Dim::Fixed(a), Dim::Fixed(b)) = (k_lhs, k_rhs) {
        if a != b {
            return Err(conversion_error!(
                "MatMul inner dimensions do not match ({} vs {})",
                a,
                b
            ));
        }
    }

    if !lhs_vec {
        dims.push(lhs_dims[lhs_dims.len() - 2]);
    }
    if !rhs_vec {
        dims.push(rhs_dims[rhs_dims.len() - 1]);
    }
    Ok(Some(TensorType {
        dims: Some(dims),
        elem: lhs.elem,
    }))
}

fn infer_gemm(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let (Some(a), Some(b)) = (inputs.tensor(0), inputs.tensor(1)) else {
        return Ok(None);
    };
    let (Some(&[a0, a1]), Some(&[b0, b1])) = (a.dims(), b.dims()) else {
        return Ok(Some(TensorType::new(a.elem, [Dim::Dynamic, Dim::Dynamic])));
    };
    let m = if inputs.attrs.int_or("transA", 0) != 0 { a1 } else { a0 };
    let n = if inputs.attrs.int_or("transB", 0) != 0 { b0 } else { b1 };
    Ok(Some(TensorType::new(a.elem, [m, n])))
}

fn infer_transpose(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let Some(input) = inputs.tensor(0) else {
        return Ok(None);
    };
    let Some(dims) = input.dims() else {
        return Ok(Some(input.clone()));
    };
    let out_dims = match inputs.attrs.ints_opt("perm")? {
        Some(perm) => {
            if perm.len() != dims.len() {
                return Err(conversion_error!(
                    "perm has {} entries but input has rank {}",
                    perm.len(),
                    dims.len()
                ));
            }
            resolve_axes(dims.len(), perm)?
                .into_iter()
                .map(|axis| dims[axis])
                .collect()
        }
        None => dims.iter().rev().copied().collect(),
    };
    Ok(Some(TensorType {
        dims: Some(out_dims),
        elem: input.elem,
    }))
}

fn infer_reduce(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let Some(input) = inputs.tensor(0) else {
        return Ok(None);
    };
    let keep_dims = inputs.attrs.int_or("keepdims", 1) != 0;
    let Some(dims) = input.dims() else {
        return Ok(Some(TensorType::unranked(input.elem)));
    };

    let axes: Option<&[i64]> = if inputs.has_input(1) {
        match inputs.constant(1) {
            Some(axes) => Some(axes),
            None => {
                // Axes are computed at runtime, so only the rank can be known.
                let dims = keep_dims.then(|| all_dynamic(dims.len()));
                return Ok(Some(TensorType {
                    dims,
                    elem: input.elem,
                }));
            }
        }
    } else {
        inputs.attrs.ints_opt("axes")?
    };

    let axes: SmallVec<[usize; 4]> = match axes {
        Some(axes) if !axes.is_empty() => resolve_axes(dims.len(), axes)?,
        _ if inputs.attrs.int_or("noop_with_empty_axes", 0) != 0 => {
            return Ok(Some(input.clone()));
        }
        _ => (0..dims.len()).collect(),
    };

    let mut out_dims = Dims::new();
    for (i, dim) in dims.iter().enumerate() {
        if !axes.contains(&i) {
            out_dims.push(*dim);
        } else if keep_dims {
            out_dims.push(Dim::Fixed(1));
        }
    }
    Ok(Some(TensorType {
        dims: Some(out_dims),
        elem: input.elem,
    }))
}

fn infer_concat(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let Some(tensors) = inputs.all_tensors() else {
        return Ok(None);
    };
    let Some(first) = tensors.first() else {
        return Ok(None);
    };
    // `axis` is optional before opset 4.
    let axis = if inputs.since_version < 4 {
        inputs.attrs.int_or("axis", 1)
    } else {
        inputs.attrs.int("axis")?
    };

    let Some(ranked) = tensors.iter().map(|t| t.dims()).collect::<Option<Vec<_>>>() else {
        return Ok(Some(TensorType::unranked(first.elem)));
    };
    let ndim = ranked[0].len();
    if ranked.iter().any(|dims| dims.len() != ndim) {
        return Err(conversion_error!("Concat inputs must have the same rank"));
    }
    let axis = resolve_axis(ndim, axis)?;

    let mut out_dims = Dims::with_capacity(ndim);
    for d in 0..ndim {
        let dim = if d == axis {
            let mut size = Some(0i64);
            for dims in &ranked {
                let (Some(acc), Dim::Fixed(dim_size)) = (size, dims[d]) else {
                    size = None;
                    break;
                };
                size = Some(acc.checked_add(dim_size).ok_or_else(|| {
                    conversion_error!("Concat output size overflows in dimension {}", d)
                })?);
            }
            size.into()
        } else {
            let mut fixed = None;
            for dims in &ranked {
                match (fixed, dims[d]) {
                    (None, Dim::Fixed(size)) => fixed = Some(size),
                    (Some(prev), Dim::Fixed(size)) if prev != size => {
                        return Err(conversion_error!(
                            "Concat inputs have mismatched sizes {} and {} in dimension {}",
                            prev,
                            size,
                            d
                        ));
                    }
                    _ => {}
                }
            }
            fixed.into()
        };
        out_dims.push(dim);
    }

    Ok(Some(TensorType {
        dims: Some(out_dims),
        elem: first.elem,
    }))
}

fn infer_shape(inputs: &ShapeInputs) -> Option<TensorType> {
    let input = inputs.tensor(0)?;
    let len = match input.rank() {
        Some(rank) => {
            let rank = rank as i64;
            let clamp = |index: i64| {
                if index < 0 {
                    (rank + index).max(0)
                } else {
                    index.min(rank)
                }
            };
            let start = clamp(inputs.attrs.int_or("start", 0));
            let end = clamp(inputs.attrs.int_or("end", rank));
            Dim::Fixed((end - start).max(0))
        }
        None => Dim::Dynamic,
    };
    Some(TensorType::new(ElementType::SInt(64), [len]))
}

/// Axes operand of Unsqueeze and Squeeze.
enum SqueezeAxes<'a> {
    /// Axes given by an attribute or constant input, if present.
    Known(Option<&'a [i64]>),
    /// Axes given by a non-constant input.
    Dynamic,
}

fn squeeze_axes<'a>(inputs: &'a ShapeInputs) -> Result<SqueezeAxes<'a>, ImportError> {
    if inputs.has_input(1) {
        return Ok(match inputs.constant(1) {
            Some(axes) => SqueezeAxes::Known(Some(axes)),
            None => SqueezeAxes::Dynamic,
        });
    }
    inputs.attrs.ints_opt("axes").map(SqueezeAxes::Known)
}

fn infer_unsqueeze(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let Some(input) = inputs.tensor(0) else {
        return Ok(None);
    };
    let (Some(dims), SqueezeAxes::Known(Some(axes))) = (input.dims(), squeeze_axes(inputs)?) else {
        return Ok(Some(TensorType::unranked(input.elem)));
    };

    let out_rank = dims.len() + axes.len();
    let axes = resolve_axes(out_rank, axes)?;
    let mut input_dims = dims.iter();
    let out_dims: Dims = (0..out_rank)
        .map(|i| {
            if axes.contains(&i) {
                Dim::Fixed(1)
            } else {
                input_dims.next().copied().unwrap_or(Dim::Dynamic)
            }
        })
        .collect();
    Ok(Some(TensorType {
        dims: Some(out_dims),
        elem: input.elem,
    }))
}

fn infer_squeeze(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let Some(input) = inputs.tensor(0) else {
        return Ok(None);
    };
    let Some(dims) = input.dims() else {
        return Ok(Some(input.clone()));
    };

    let out_dims: Dims = match squeeze_axes(inputs)? {
        SqueezeAxes::Known(Some(axes)) => {
            let axes = resolve_axes(dims.len(), axes)?;
            for &axis in &axes {
                if let Dim::Fixed(size) = dims[axis] {
                    if size != 1 {
                        return Err(conversion_error!(
                            "cannot squeeze dimension {} of size {}",
                            axis,
                            size
                        ));
                    }
                }
            }
            dims.iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, d)| *d)
                .collect()
        }
        SqueezeAxes::Known(None) if dims.iter().all(|d| d.fixed().is_some()) => dims
            .iter()
            .copied()
            .filter(|d| *d != Dim::Fixed(1))
            .collect(),
        _ => return Ok(Some(TensorType::unranked(input.elem))),
    };
    Ok(Some(TensorType {
        dims: Some(out_dims),
        elem: input.elem,
    }))
}

fn infer_flatten(inputs: &ShapeInputs) -> Result<Option<TensorType>, ImportError> {
    let Some(input) = inputs.tensor(0) else {
        return Ok(None);
    };
    let Some(dims) = input.dims() else {
        return Ok(Some(TensorType::new(input.elem, [Dim::Dynamic, Dim::Dynamic])));
    };

    // Unlike other axes, the flatten axis may equal the rank.
    let rank = dims.len() as i64;
    let axis = inputs.attrs.int_or("axis", 1);
    if axis < -rank || axis > rank {
        return Err(conversion_error!(
            "axis {} is out of range for rank {}",
            axis,
            rank
        ));
    }
    let axis = if axis < 0 { rank + axis } else { axis } as usize;

    Ok(Some(TensorType::new(
        input.elem,
        [product(&dims[..axis])?, product(&dims[axis..])?],
    )))
}
