use crate::attr::Attribute;
use crate::types::Type;
use crate::value_id::ValueId;

/// Source location attached to operations and functions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Location {
    #[default]
    Unknown,
    /// A named location, eg. the name of the source graph node.
    Name(String),
}

impl Location {
    pub fn name(name: impl Into<String>) -> Self {
        Location::Name(name.into())
    }
}

/// A typed value defined by a block argument or operation result.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Value {
    pub id: ValueId,
    pub ty: Type,
}

impl Value {
    pub fn new(id: ValueId, ty: Type) -> Self {
        Value { id, ty }
    }
}

/// An operation in a block.
///
/// Operations are created using [`Operation::build`] and are immutable once
/// built.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Operation {
    name: String,
    operands: Vec<ValueId>,
    results: Vec<Value>,
    attributes: Vec<(String, Attribute)>,
    regions: Vec<Region>,
    location: Location,
}

impl Operation {
    /// Start building an operation with a given name (eg. `torch.operator`).
    pub fn build(name: impl Into<String>) -> OperationBuilder {
        OperationBuilder {
            op: Operation {
                name: name.into(),
                operands: Vec::new(),
                results: Vec::new(),
                attributes: Vec::new(),
                regions: Vec::new(),
                location: Location::Unknown,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operands(&self) -> &[ValueId] {
        &self.operands
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Return the attributes in the order they were added.
    pub fn attributes(&self) -> &[(String, Attribute)] {
        &self.attributes
    }

    /// Look up an attribute by name.
    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, val)| val)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

/// Builder for an [`Operation`].
pub struct OperationBuilder {
    op: Operation,
}

impl OperationBuilder {
    pub fn operand(mut self, id: ValueId) -> Self {
        self.op.operands.push(id);
        self
    }

    pub fn operands(mut self, ids: impl IntoIterator<Item = ValueId>) -> Self {
        self.op.operands.extend(ids);
        self
    }

    pub fn result(mut self, id: ValueId, ty: Type) -> Self {
        self.op.results.push(Value::new(id, ty));
        self
    }

    pub fn results(mut self, results: impl IntoIterator<Item = Value>) -> Self {
        self.op.results.extend(results);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Attribute>) -> Self {
        self.op.attributes.push((name.into(), value.into()));
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.op.regions.push(region);
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.op.location = location;
        self
    }

    pub fn finish(self) -> Operation {
        self.op
    }
}

/// A sequence of operations with arguments, ending in a terminator.
///
/// Constant literals are kept apart from the other operations so that
/// consumers can distinguish materialized weights from computation. They are
/// evaluated before `ops`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    args: Vec<Value>,
    literals: Vec<Operation>,
    ops: Vec<Operation>,
    terminator: Operation,
}

impl Block {
    pub fn new(
        args: Vec<Value>,
        literals: Vec<Operation>,
        ops: Vec<Operation>,
        terminator: Operation,
    ) -> Self {
        Block {
            args,
            literals,
            ops,
            terminator,
        }
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn literals(&self) -> &[Operation] {
        &self.literals
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn terminator(&self) -> &Operation {
        &self.terminator
    }

    /// Iterate over literals, then operations, then the terminator.
    pub fn all_ops(&self) -> impl Iterator<Item = &Operation> {
        self.literals
            .iter()
            .chain(self.ops.iter())
            .chain(std::iter::once(&self.terminator))
    }
}

/// A region attached to an operation. Regions produced by the importer
/// contain a single block.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    blocks: Vec<Block>,
}

impl Region {
    pub fn new(blocks: Vec<Block>) -> Self {
        Region { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl From<Block> for Region {
    fn from(block: Block) -> Self {
        Region::new(vec![block])
    }
}

/// A function with a single-block body.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    name: String,
    result_types: Vec<Type>,
    attributes: Vec<(String, Attribute)>,
    body: Block,
    location: Location,
}

impl Function {
    /// Create a function. The parameters of the function are the arguments
    /// of `body`.
    pub fn new(
        name: impl Into<String>,
        result_types: Vec<Type>,
        attributes: Vec<(String, Attribute)>,
        body: Block,
        location: Location,
    ) -> Self {
        Function {
            name: name.into(),
            result_types,
            attributes,
            body,
            location,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        self.body.args()
    }

    pub fn arg_types(&self) -> impl Iterator<Item = &Type> {
        self.body.args().iter().map(|v| &v.ty)
    }

    pub fn result_types(&self) -> &[Type] {
        &self.result_types
    }

    pub fn attributes(&self) -> &[(String, Attribute)] {
        &self.attributes
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, val)| val)
    }

    pub fn body(&self) -> &Block {
        &self.body
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

/// Top-level container of functions.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    functions: Vec<Function>,
}

impl Module {
    pub fn new(functions: Vec<Function>) -> Self {
        Module { functions }
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::{Block, Location, Operation};
    use crate::attr::Attribute;
    use crate::types::{ElementType, Type};
    use crate::value_id::ValueIdGen;

    #[test]
    fn test_build_operation() {
        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let y = ids.next_id();
        let ty = Type::tensor(ElementType::F32, [2i64, 3]);

        let op = Operation::build("torch.operator")
            .attr("name", "onnx.Relu")
            .operand(x)
            .result(y, ty.clone())
            .location(Location::name("relu"))
            .finish();

        assert_eq!(op.name(), "torch.operator");
        assert_eq!(op.operands(), &[x]);
        assert_eq!(op.results()[0].id, y);
        assert_eq!(op.results()[0].ty, ty);
        assert_eq!(op.attr("name"), Some(&Attribute::String("onnx.Relu".into())));
        assert_eq!(op.attr("missing"), None);
        assert_eq!(op.location(), &Location::Name("relu".into()));
    }

    #[test]
    fn test_block_all_ops() {
        let ret = Operation::build("func.return").finish();
        let literal = Operation::build("torch.operator")
            .attr("name", "onnx.Constant")
            .finish();
        let op = Operation::build("torch.operator")
            .attr("name", "onnx.Relu")
            .finish();
        let block = Block::new(Vec::new(), vec![literal], vec![op], ret);

        let names: Vec<_> = block
            .all_ops()
            .map(|op| {
                op.attr("name")
                    .and_then(|a| a.as_str())
                    .unwrap_or(op.name())
                    .to_string()
            })
            .collect();
        assert_eq!(names, ["onnx.Constant", "onnx.Relu", "func.return"]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serialize_module() {
        use super::{Function, Module, Value};
        use crate::attr::{DenseData, DenseElements};
        use crate::types::Dim;

        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let w = ids.next_id();
        let y = ids.next_id();
        let x_ty = Type::tensor(ElementType::F32, [Dim::Dynamic, Dim::Fixed(3)]);
        let w_ty = Type::tensor(ElementType::F32, [3i64]);

        let literal = Operation::build("torch.operator")
            .attr("name", "onnx.Constant")
            .attr(
                "torch.onnx.value",
                DenseElements::new(vec![3], ElementType::F32, DenseData::Floats(vec![1., 2., 3.])),
            )
            .result(w, w_ty)
            .finish();
        let add = Operation::build("torch.operator")
            .attr("name", "onnx.Add")
            .attr("torch.onnx.alpha", 0.5f32)
            .operand(x)
            .operand(w)
            .result(y, x_ty.clone())
            .location(Location::name("add"))
            .finish();
        let body = Block::new(
            vec![Value::new(x, x_ty.clone())],
            vec![literal],
            vec![add],
            Operation::build("func.return").operand(y).finish(),
        );
        let module = Module::new(vec![Function::new(
            "main",
            vec![x_ty],
            vec![("torch.onnx_meta.ir_version".into(), Attribute::Int(8))],
            body,
            Location::name("graph:main"),
        )]);

        let json = serde_json::to_string(&module).unwrap();
        let parsed: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, module);
    }
}
