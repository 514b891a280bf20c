use log::{debug, warn};
use onnx_import_ir::{Attribute, Block, Location, Operation, Type, Value, ValueId, ValueIdGen};
use onnx_import_proto::onnx;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::ImportOptions;
use crate::error::{ImportError, ImportErrorKind};
use crate::op_registry::TORCH_OPERATOR;
use crate::types::{dense_from_tensor, int_constant, tensor_type, type_from_proto};

/// Name of the operation which produces the value for absent operands.
pub const CONSTANT_NONE: &str = "torch.constant.none";

/// State of one graph (the main graph or a subgraph) during import.
///
/// This owns the bindings from ONNX value names to IR values for the graph's
/// scope, and the operations emitted so far. A subgraph's context has the
/// enclosing graph's context as a parent, whose bindings are visible to the
/// subgraph but cannot be changed by it.
pub struct GraphContext<'p> {
    parent: Option<&'p GraphContext<'p>>,
    ids: &'p ValueIdGen,

    bindings: FxHashMap<String, Value>,

    /// Names which may be rebound.
    shadowable: FxHashSet<String>,

    /// Values of integer constants, read by shape rules.
    constants: FxHashMap<String, Vec<i64>>,

    /// Declared types of values, from overrides, `value_info` and the graph
    /// boundary.
    type_hints: FxHashMap<String, Type>,

    /// Parameters of the graph, in declaration order.
    inputs: Vec<Value>,

    /// Constant operations for initializers.
    literals: Vec<Operation>,

    ops: Vec<Operation>,

    none_value: Option<ValueId>,

    /// Counter used to generate names for unnamed nodes.
    next_name: usize,
}

impl<'p> GraphContext<'p> {
    /// Create the context for a model's main graph.
    pub fn new(ids: &'p ValueIdGen) -> Self {
        GraphContext {
            parent: None,
            ids,
            bindings: FxHashMap::default(),
            shadowable: FxHashSet::default(),
            constants: FxHashMap::default(),
            type_hints: FxHashMap::default(),
            inputs: Vec::new(),
            literals: Vec::new(),
            ops: Vec::new(),
            none_value: None,
            next_name: 0,
        }
    }

    /// Create the context for a subgraph of this graph.
    pub fn child(&self) -> GraphContext<'_> {
        let mut child = GraphContext::new(self.ids);
        child.parent = Some(self);
        child
    }

    pub fn ids(&self) -> &'p ValueIdGen {
        self.ids
    }

    /// Declare the initializers, value types and inputs of a graph.
    ///
    /// `options` are applied for the main graph. Subgraphs are declared with
    /// `None`, in which case inputs are never elided and no overrides apply.
    pub fn declare_graph(
        &mut self,
        graph: &onnx::GraphProto,
        options: Option<&ImportOptions>,
    ) -> Result<(), ImportError> {
        for tensor in &graph.initializer {
            self.declare_initializer(tensor)?;
        }

        let value_name = |info: &onnx::ValueInfoProto| info.name.clone().unwrap_or_default();

        if let Some(options) = options {
            for output in &graph.output {
                let name = value_name(output);
                if let Some(type_override) = options.output_overrides.get(&name) {
                    let declared = declared_type(output)?;
                    let ty = type_override.apply(&name, declared.as_ref())?;
                    self.add_type_hint(&name, ty);
                }
            }
            for name in options.output_overrides.keys() {
                if !graph.output.iter().any(|o| o.name.as_ref() == Some(name)) {
                    warn!("output override \"{}\" does not match any graph output", name);
                }
            }
        }
        for info in graph.value_info.iter().chain(&graph.output).chain(&graph.input) {
            if let Some(ty) = declared_type(info)? {
                self.add_type_hint(&value_name(info), ty);
            }
        }

        let elide = options.is_some_and(|opts| opts.elide_initialized_inputs);
        for input in &graph.input {
            let name = value_name(input);
            if elide && graph.initializer.iter().any(|t| t.name.as_ref() == Some(&name)) {
                debug!("input \"{}\" has an initializer, omitting from parameters", name);
                continue;
            }

            let declared = declared_type(input)?;
            let ty = match options.and_then(|opts| opts.input_overrides.get(&name)) {
                Some(type_override) => type_override.apply(&name, declared.as_ref())?,
                None => declared.unwrap_or_else(|| {
                    warn!("input \"{}\" has no type, using none type", name);
                    Type::None
                }),
            };
            self.declare_input(&name, ty)?;
        }
        if let Some(options) = options {
            for name in options.input_overrides.keys() {
                if !graph.input.iter().any(|i| i.name.as_ref() == Some(name)) {
                    warn!("input override \"{}\" does not match any graph input", name);
                }
            }

            // Applies to node outputs only, as inputs are already bound.
            for name in &options.shadowable_names {
                self.allow_shadowing(name);
            }
        }

        Ok(())
    }

    /// Add a constant operation for an initializer and bind its name.
    pub fn declare_initializer(&mut self, tensor: &onnx::TensorProto) -> Result<(), ImportError> {
        let name = tensor.name.as_deref().unwrap_or_default();
        if name.is_empty() {
            return Err(ImportError::invalid_model("initializer has no name"));
        }
        let invalid = |msg: String| {
            ImportError::invalid_model(format!("initializer \"{}\": {}", name, msg))
        };
        let ty = tensor_type(tensor).map_err(invalid)?;
        let dense = dense_from_tensor(tensor).map_err(invalid)?;

        let value = Value::new(self.ids.next_id(), ty);
        self.bind(name, value.clone())?;
        if let Some(values) = int_constant(tensor) {
            self.constants.insert(name.to_string(), values);
        }

        let op = Operation::build(TORCH_OPERATOR)
            .attr("name", "onnx.Constant")
            .attr("torch.onnx.value", Attribute::Dense(dense))
            .result(value.id, value.ty)
            .location(Location::name(name))
            .finish();
        self.literals.push(op);
        Ok(())
    }

    /// Add a parameter to the graph and bind its name.
    pub fn declare_input(&mut self, name: &str, ty: Type) -> Result<Value, ImportError> {
        let value = Value::new(self.ids.next_id(), ty);
        self.bind(name, value.clone())?;
        self.inputs.push(value.clone());
        Ok(value)
    }

    /// Record the declared type of a value, unless it already has one.
    pub fn add_type_hint(&mut self, name: &str, ty: Type) {
        if name.is_empty() {
            return;
        }
        self.type_hints.entry(name.to_string()).or_insert(ty);
    }

    /// Return the declared type of a value in this graph or an enclosing
    /// graph.
    pub fn type_hint(&self, name: &str) -> Option<&Type> {
        self.type_hints
            .get(name)
            .or_else(|| self.parent?.type_hint(name))
    }

    /// Allow `name` to be bound again in this graph.
    pub fn allow_shadowing(&mut self, name: &str) {
        self.shadowable.insert(name.to_string());
    }

    /// Check that binding `name` would succeed.
    pub fn check_bindable(&self, name: &str) -> Result<(), ImportError> {
        if self.bindings.contains_key(name) && !self.shadowable.contains(name) {
            return Err(ImportErrorKind::DuplicateBinding {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Bind a value name in this graph.
    ///
    /// Fails with [`DuplicateBinding`](ImportErrorKind::DuplicateBinding) if
    /// the name is already bound in this graph, unless shadowing has been
    /// allowed for it. Names bound in enclosing graphs may be rebound.
    pub fn bind(&mut self, name: &str, value: Value) -> Result<(), ImportError> {
        self.check_bindable(name)?;
        self.bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// Look up the value bound to a name in this graph or an enclosing
    /// graph.
    pub fn lookup(&self, name: &str) -> Result<&Value, ImportError> {
        self.find(name).ok_or_else(|| {
            ImportErrorKind::UndefinedValue {
                name: name.to_string(),
            }
            .into()
        })
    }

    fn find(&self, name: &str) -> Option<&Value> {
        self.bindings
            .get(name)
            .or_else(|| self.parent?.find(name))
    }

    /// Generate a name which is not bound in this graph, based on `hint`.
    pub fn fresh_name(&mut self, hint: &str) -> String {
        loop {
            let name = format!("{}_{}", hint, self.next_name);
            self.next_name += 1;
            if !self.bindings.contains_key(&name) {
                return name;
            }
        }
    }

    /// Return the value of an integer constant visible in this graph.
    pub fn constant(&self, name: &str) -> Option<&[i64]> {
        if self.bindings.contains_key(name) {
            return self.constants.get(name).map(|c| c.as_slice());
        }
        self.parent?.constant(name)
    }

    pub fn record_constant(&mut self, name: &str, values: Vec<i64>) {
        self.constants.insert(name.to_string(), values);
    }

    /// Return the value used for absent operands, if one has been created in
    /// this graph or an enclosing graph.
    pub fn none_value(&self) -> Option<ValueId> {
        self.none_value.or_else(|| self.parent?.none_value())
    }

    /// Create the operation which defines the value for absent operands.
    pub fn none_op(id: ValueId) -> Operation {
        Operation::build(CONSTANT_NONE)
            .result(id, Type::None)
            .location(Location::name("onnx_importer.none"))
            .finish()
    }

    /// Add the operation which defines the value `id` for absent operands.
    pub fn add_none(&mut self, id: ValueId, op: Operation) {
        self.none_value = Some(id);
        self.ops.push(op);
    }

    pub fn add_ops(&mut self, ops: impl IntoIterator<Item = Operation>) {
        self.ops.extend(ops);
    }

    /// Look up the values for a graph's declared outputs.
    pub fn resolve_outputs(&self, graph: &onnx::GraphProto) -> Result<Vec<Value>, ImportError> {
        graph
            .output
            .iter()
            .map(|output| {
                let name = output.name.as_deref().unwrap_or_default();
                self.find(name).cloned().ok_or_else(|| {
                    ImportErrorKind::UndefinedGraphOutput {
                        name: name.to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }

    /// Finish the graph, producing a block that ends with an operation named
    /// `terminator` which returns `outputs`.
    pub fn into_block(self, terminator: &str, outputs: &[Value]) -> Block {
        let terminator = Operation::build(terminator)
            .operands(outputs.iter().map(|v| v.id))
            .finish();
        Block::new(self.inputs, self.literals, self.ops, terminator)
    }
}

/// Return the declared type of a graph value, if it has one.
fn declared_type(info: &onnx::ValueInfoProto) -> Result<Option<Type>, ImportError> {
    let Some(tp) = &info.r#type else {
        return Ok(None);
    };
    type_from_proto(tp).map(Some).map_err(|err| {
        ImportError::invalid_model(format!(
            "value \"{}\": {}",
            info.name.as_deref().unwrap_or_default(),
            err
        ))
    })
}

#[cfg(test)]
mod tests {
    use onnx_import_ir::{Attribute, DenseData, ElementType, Type, Value, ValueIdGen};
    use onnx_import_proto::onnx;
    use onnx_import_testing::onnx::{
        create_graph, create_tensor, create_value_info, create_zeros, f32_value_info,
        GraphProtoExt, TensorData,
    };

    use super::GraphContext;
    use crate::config::{ImportOptions, TypeOverride};
    use crate::error::ImportErrorKind;

    fn f32_type(dims: &[i64]) -> Type {
        Type::tensor(ElementType::F32, dims.iter().copied())
    }

    #[test]
    fn test_bind_and_lookup() {
        let ids = ValueIdGen::new();
        let mut ctx = GraphContext::new(&ids);

        let x = ctx.declare_input("x", f32_type(&[2])).unwrap();
        assert_eq!(ctx.lookup("x").unwrap(), &x);

        let err = ctx.lookup("y").err().unwrap();
        assert_eq!(
            err.kind(),
            &ImportErrorKind::UndefinedValue { name: "y".into() }
        );

        let y = Value::new(ids.next_id(), f32_type(&[2]));
        ctx.bind("y", y.clone()).unwrap();
        assert_eq!(ctx.lookup("y").unwrap(), &y);
    }

    #[test]
    fn test_duplicate_binding() {
        let ids = ValueIdGen::new();
        let mut ctx = GraphContext::new(&ids);
        ctx.bind("y", Value::new(ids.next_id(), Type::None)).unwrap();

        let err = ctx
            .bind("y", Value::new(ids.next_id(), Type::None))
            .err()
            .unwrap();
        assert_eq!(
            err.kind(),
            &ImportErrorKind::DuplicateBinding { name: "y".into() }
        );

        ctx.allow_shadowing("y");
        let shadow = Value::new(ids.next_id(), Type::None);
        ctx.bind("y", shadow.clone()).unwrap();
        assert_eq!(ctx.lookup("y").unwrap(), &shadow);
    }

    #[test]
    fn test_initializer_then_input() {
        let ids = ValueIdGen::new();
        let mut ctx = GraphContext::new(&ids);
        ctx.declare_initializer(&create_zeros("w", &[3, 4])).unwrap();

        let err = ctx.declare_input("w", f32_type(&[3, 4])).err().unwrap();
        assert_eq!(
            err.kind(),
            &ImportErrorKind::DuplicateBinding { name: "w".into() }
        );
    }

    #[test]
    fn test_child_scope() {
        let ids = ValueIdGen::new();
        let mut parent = GraphContext::new(&ids);
        let x = parent.declare_input("x", f32_type(&[1])).unwrap();
        parent.record_constant("x", vec![5]);

        let mut child = parent.child();
        assert_eq!(child.lookup("x").unwrap(), &x);
        assert_eq!(child.constant("x"), Some([5].as_slice()));

        // Names from the parent can be rebound in the child without
        // affecting the parent.
        let inner = child.declare_input("x", f32_type(&[2])).unwrap();
        assert_eq!(child.lookup("x").unwrap(), &inner);
        assert_eq!(child.constant("x"), None);
        drop(child);
        assert_eq!(parent.lookup("x").unwrap(), &x);
    }

    #[test]
    fn test_fresh_name() {
        let ids = ValueIdGen::new();
        let mut ctx = GraphContext::new(&ids);
        ctx.bind("Relu_0", Value::new(ids.next_id(), Type::None))
            .unwrap();
        assert_eq!(ctx.fresh_name("Relu"), "Relu_1");
        assert_eq!(ctx.fresh_name("Relu"), "Relu_2");
        assert_eq!(ctx.fresh_name("Add"), "Add_3");
    }

    #[test]
    fn test_declare_graph() {
        let axes = create_tensor("axes", &[1], onnx::DataType::INT64, TensorData::Int64(vec![1]));
        let graph = create_graph("g")
            .with_initializer(create_zeros("w", &[3, 4]))
            .with_initializer(axes)
            .with_input(f32_value_info("x", &[2, 3]))
            .with_input(f32_value_info("w", &[3, 4]))
            .with_input(create_value_info("untyped"))
            .with_value_info(f32_value_info("h", &[2, 4]))
            .with_output(f32_value_info("y", &[2, 4]));

        let mut options = ImportOptions::new();
        options.input_override(
            "x",
            TypeOverride {
                dtype: None,
                shape: Some(vec![None, Some(3)]),
            },
        );
        options.output_override(
            "y",
            TypeOverride {
                dtype: Some("f16".into()),
                shape: None,
            },
        );

        let ids = ValueIdGen::new();
        let mut ctx = GraphContext::new(&ids);
        ctx.declare_graph(&graph, Some(&options)).unwrap();

        assert_eq!(ctx.constant("axes"), Some([1].as_slice()));
        assert_eq!(ctx.type_hint("h"), Some(&f32_type(&[2, 4])));
        assert_eq!(
            ctx.type_hint("y"),
            Some(&Type::tensor(ElementType::F16, [2i64, 4]))
        );

        let x_type = Type::tensor(
            ElementType::F32,
            [onnx_import_ir::Dim::Dynamic, onnx_import_ir::Dim::Fixed(3)],
        );
        assert_eq!(ctx.lookup("x").unwrap().ty, x_type);
        assert_eq!(ctx.lookup("untyped").unwrap().ty, Type::None);

        let block = ctx.into_block("func.return", &[]);
        // `w` has an initializer, so is not a parameter.
        assert_eq!(block.args().len(), 2);
        assert_eq!(block.literals().len(), 2);

        let w = &block.literals()[0];
        assert_eq!(w.attr("name"), Some(&Attribute::String("onnx.Constant".into())));
        match w.attr("torch.onnx.value") {
            Some(Attribute::Dense(dense)) => {
                assert_eq!(dense.shape, [3, 4]);
                assert_eq!(dense.data, DenseData::Raw(vec![0; 48]));
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_declare_subgraph_keeps_initialized_inputs() {
        let graph = create_graph("body")
            .with_initializer(create_zeros("w", &[1]))
            .with_input(f32_value_info("w", &[1]));

        let ids = ValueIdGen::new();
        let mut ctx = GraphContext::new(&ids);
        let err = ctx.declare_graph(&graph, None).err().unwrap();
        assert_eq!(
            err.kind(),
            &ImportErrorKind::DuplicateBinding { name: "w".into() }
        );
    }

    #[test]
    fn test_none_value() {
        let ids = ValueIdGen::new();
        let mut parent = GraphContext::new(&ids);
        assert_eq!(parent.none_value(), None);

        let id = ids.next_id();
        parent.add_none(id, GraphContext::none_op(id));
        assert_eq!(parent.none_value(), Some(id));
        assert_eq!(parent.child().none_value(), Some(id));
    }
}
