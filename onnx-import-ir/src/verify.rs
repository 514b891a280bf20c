//! Structural verification of modules.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::attr::{Attribute, DenseData, DenseElements};
use crate::op::{Block, Function, Module, Operation, Value};
use crate::types::Type;
use crate::value_id::ValueId;

/// Name of the operation that terminates a function body.
pub const FUNC_RETURN: &str = "func.return";

/// Name of the operation that terminates the block of a `torch.operator` region.
pub const OPERATOR_TERMINATOR: &str = "torch.operator_terminator";

/// Error returned when a module fails verification.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifyError {
    message: String,
}

impl VerifyError {
    fn new(message: impl Into<String>) -> Self {
        VerifyError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for VerifyError {}

/// Check the structural invariants of a module.
///
/// This verifies that:
///
/// - Function names are unique
/// - Each value is defined exactly once
/// - Every operand refers to a value defined earlier in the same block or
///   in an enclosing block
/// - Blocks end with the expected terminator, and function return values
///   match the declared result types
/// - Attribute names on each operation are unique
/// - Dense attribute data matches the element count of the attribute's shape
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    let mut names = FxHashSet::default();
    for func in module.functions() {
        if !names.insert(func.name()) {
            return Err(VerifyError::new(format!(
                "function \"{}\" is defined more than once",
                func.name()
            )));
        }
        verify_function(func)?;
    }
    Ok(())
}

/// Check the structural invariants of a single function.
pub fn verify_function(func: &Function) -> Result<(), VerifyError> {
    let mut verifier = Verifier::default();
    check_unique_attrs(func.attributes(), || format!("function \"{}\"", func.name()))?;
    verifier.verify_block(func.body(), FUNC_RETURN, |verifier, terminator| {
        let operands = terminator.operands();
        if operands.len() != func.result_types().len() {
            return Err(VerifyError::new(format!(
                "function \"{}\" returns {} values but declares {} results",
                func.name(),
                operands.len(),
                func.result_types().len()
            )));
        }
        for (i, (id, expected)) in operands.iter().zip(func.result_types()).enumerate() {
            let actual = verifier.visible.get(id);
            if actual != Some(expected) {
                return Err(VerifyError::new(format!(
                    "function \"{}\" result {} has type {} but {} was returned",
                    func.name(),
                    i,
                    expected,
                    actual.map(|t| t.to_string()).unwrap_or_default()
                )));
            }
        }
        Ok(())
    })
}

/// Return a short description of an operation for use in error messages.
fn describe_op(op: &Operation) -> String {
    match op.attr("name").and_then(|n| n.as_str()) {
        Some(name) => format!("{} \"{}\"", op.name(), name),
        None => op.name().to_string(),
    }
}

fn check_unique_attrs(
    attrs: &[(String, Attribute)],
    owner: impl Fn() -> String,
) -> Result<(), VerifyError> {
    let mut seen = FxHashSet::default();
    for (name, value) in attrs {
        if !seen.insert(name.as_str()) {
            return Err(VerifyError::new(format!(
                "{} has duplicate attribute \"{}\"",
                owner(),
                name
            )));
        }
        check_attr_value(value).map_err(|msg| {
            VerifyError::new(format!("{} attribute \"{}\": {}", owner(), name, msg))
        })?;
    }
    Ok(())
}

fn check_dense(dense: &DenseElements) -> Result<(), String> {
    let count = dense
        .num_elements()
        .ok_or_else(|| format!("element count of shape {:?} overflows", dense.shape))?;
    match &dense.data {
        DenseData::Raw(bytes) => {
            let Some(bits) = dense.elem.bit_width() else {
                return Err(format!("raw data is not supported for {}", dense.elem));
            };
            let expected = count
                .checked_mul(bits as usize)
                .ok_or_else(|| format!("size of {} elements overflows", count))?
                .div_ceil(8);
            if bytes.len() != expected {
                return Err(format!(
                    "expected {} bytes of data for {} elements but found {}",
                    expected,
                    count,
                    bytes.len()
                ));
            }
        }
        data => {
            let len = data.typed_len().unwrap_or_default();
            if len != count {
                return Err(format!(
                    "expected {} elements but found {}",
                    count, len
                ));
            }
        }
    }
    Ok(())
}

fn check_attr_value(attr: &Attribute) -> Result<(), String> {
    match attr {
        Attribute::Dense(dense) => check_dense(dense),
        Attribute::Array(items) => items.iter().try_for_each(check_attr_value),
        Attribute::Dict(entries) => entries.iter().try_for_each(|(_, v)| check_attr_value(v)),
        Attribute::Int(_) | Attribute::Float(_) | Attribute::String(_) => Ok(()),
    }
}

#[derive(Default)]
struct Verifier {
    /// Every value defined so far, in any scope.
    defined: FxHashSet<ValueId>,

    /// Values which are in scope at the current point.
    visible: FxHashMap<ValueId, Type>,
}

impl Verifier {
    fn define(&mut self, value: &Value, scope: &mut Vec<ValueId>) -> Result<(), VerifyError> {
        if !self.defined.insert(value.id) {
            return Err(VerifyError::new(format!(
                "value {} is defined more than once",
                value.id
            )));
        }
        self.visible.insert(value.id, value.ty.clone());
        scope.push(value.id);
        Ok(())
    }

    fn check_operands(&self, op: &Operation) -> Result<(), VerifyError> {
        for operand in op.operands() {
            if !self.visible.contains_key(operand) {
                return Err(VerifyError::new(format!(
                    "operand {} of {} is not defined before use",
                    operand,
                    describe_op(op)
                )));
            }
        }
        Ok(())
    }

    fn verify_op(&mut self, op: &Operation, scope: &mut Vec<ValueId>) -> Result<(), VerifyError> {
        self.check_operands(op)?;
        check_unique_attrs(op.attributes(), || describe_op(op))?;

        for region in op.regions() {
            for block in region.blocks() {
                self.verify_block(block, OPERATOR_TERMINATOR, |_, _| Ok(()))?;
            }
        }

        for result in op.results() {
            self.define(result, scope)?;
        }
        Ok(())
    }

    fn verify_block(
        &mut self,
        block: &Block,
        terminator_name: &str,
        check_terminator: impl FnOnce(&Self, &Operation) -> Result<(), VerifyError>,
    ) -> Result<(), VerifyError> {
        let mut scope = Vec::new();
        for arg in block.args() {
            self.define(arg, &mut scope)?;
        }

        for literal in block.literals() {
            if !literal.operands().is_empty() {
                return Err(VerifyError::new(format!(
                    "literal {} has operands",
                    describe_op(literal)
                )));
            }
            self.verify_op(literal, &mut scope)?;
        }
        for op in block.ops() {
            self.verify_op(op, &mut scope)?;
        }

        let terminator = block.terminator();
        if terminator.name() != terminator_name {
            return Err(VerifyError::new(format!(
                "block ends with {} instead of {}",
                terminator.name(),
                terminator_name
            )));
        }
        if !terminator.results().is_empty() {
            return Err(VerifyError::new(format!(
                "terminator {} must not have results",
                terminator.name()
            )));
        }
        self.check_operands(terminator)?;
        check_terminator(&*self, terminator)?;

        for id in scope {
            self.visible.remove(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{verify_module, FUNC_RETURN, OPERATOR_TERMINATOR};
    use crate::attr::{DenseData, DenseElements};
    use crate::op::{Block, Function, Location, Module, Operation, Region, Value};
    use crate::types::{ElementType, Type};
    use crate::value_id::ValueIdGen;

    fn f32_type() -> Type {
        Type::tensor(ElementType::F32, [4i64])
    }

    fn make_function(body: Block, result_types: Vec<Type>) -> Module {
        Module::new(vec![Function::new(
            "main",
            result_types,
            Vec::new(),
            body,
            Location::Unknown,
        )])
    }

    #[test]
    fn test_verify_valid_module() {
        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let y = ids.next_id();
        let inner = ids.next_id();

        let region_block = Block::new(
            Vec::new(),
            Vec::new(),
            vec![Operation::build("torch.operator")
                .attr("name", "onnx.Neg")
                .operand(x)
                .result(inner, f32_type())
                .finish()],
            Operation::build(OPERATOR_TERMINATOR).operand(inner).finish(),
        );
        let op = Operation::build("torch.operator")
            .attr("name", "onnx.If")
            .operand(x)
            .result(y, f32_type())
            .region(Region::from(region_block))
            .finish();
        let body = Block::new(
            vec![Value::new(x, f32_type())],
            Vec::new(),
            vec![op],
            Operation::build(FUNC_RETURN).operand(y).finish(),
        );

        assert_eq!(verify_module(&make_function(body, vec![f32_type()])), Ok(()));
    }

    #[test]
    fn test_verify_use_before_def() {
        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let y = ids.next_id();

        let body = Block::new(
            Vec::new(),
            Vec::new(),
            vec![Operation::build("torch.operator")
                .attr("name", "onnx.Relu")
                .operand(x)
                .result(y, f32_type())
                .finish()],
            Operation::build(FUNC_RETURN).operand(y).finish(),
        );
        let err = verify_module(&make_function(body, vec![f32_type()])).err().unwrap();
        assert_eq!(
            err.message(),
            "operand %0 of torch.operator \"onnx.Relu\" is not defined before use"
        );
    }

    #[test]
    fn test_verify_region_values_not_visible_outside() {
        let ids = ValueIdGen::new();
        let inner = ids.next_id();
        let y = ids.next_id();

        let region_block = Block::new(
            Vec::new(),
            vec![Operation::build("torch.operator")
                .attr("name", "onnx.Constant")
                .result(inner, f32_type())
                .finish()],
            Vec::new(),
            Operation::build(OPERATOR_TERMINATOR).operand(inner).finish(),
        );
        let op = Operation::build("torch.operator")
            .attr("name", "onnx.Loop")
            .result(y, f32_type())
            .region(Region::from(region_block))
            .finish();
        let body = Block::new(
            Vec::new(),
            Vec::new(),
            vec![op],
            Operation::build(FUNC_RETURN).operand(inner).finish(),
        );
        let err = verify_module(&make_function(body, vec![f32_type()])).err().unwrap();
        assert!(err.message().contains("not defined before use"));
    }

    #[test]
    fn test_verify_return_type_mismatch() {
        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let body = Block::new(
            vec![Value::new(x, f32_type())],
            Vec::new(),
            Vec::new(),
            Operation::build(FUNC_RETURN).operand(x).finish(),
        );
        let err = verify_module(&make_function(body, vec![Type::None]))
            .err()
            .unwrap();
        assert_eq!(
            err.message(),
            "function \"main\" result 0 has type !torch.none but !torch.vtensor<[4],f32> was returned"
        );
    }

    #[test]
    fn test_verify_duplicate_definition() {
        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let body = Block::new(
            vec![Value::new(x, f32_type())],
            Vec::new(),
            vec![Operation::build("torch.operator")
                .attr("name", "onnx.Relu")
                .operand(x)
                .result(x, f32_type())
                .finish()],
            Operation::build(FUNC_RETURN).finish(),
        );
        let err = verify_module(&make_function(body, Vec::new())).err().unwrap();
        assert_eq!(err.message(), "value %0 is defined more than once");
    }

    #[test]
    fn test_verify_dense_data_size() {
        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let literal = Operation::build("torch.operator")
            .attr("name", "onnx.Constant")
            .attr(
                "torch.onnx.value",
                DenseElements::new(vec![4], ElementType::F32, DenseData::Raw(vec![0; 12])),
            )
            .result(x, f32_type())
            .finish();
        let body = Block::new(
            Vec::new(),
            vec![literal],
            Vec::new(),
            Operation::build(FUNC_RETURN).operand(x).finish(),
        );
        let err = verify_module(&make_function(body, vec![f32_type()])).err().unwrap();
        assert_eq!(
            err.message(),
            "torch.operator \"onnx.Constant\" attribute \"torch.onnx.value\": expected 16 bytes of data for 4 elements but found 12"
        );
    }

    #[test]
    fn test_verify_wrong_terminator() {
        let body = Block::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Operation::build(OPERATOR_TERMINATOR).finish(),
        );
        let err = verify_module(&make_function(body, Vec::new())).err().unwrap();
        assert_eq!(
            err.message(),
            "block ends with torch.operator_terminator instead of func.return"
        );
    }
}
