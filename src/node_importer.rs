use log::debug;
use onnx_import_ir::{Location, Operation, Region, Type, ValueId, OPERATOR_TERMINATOR};
use onnx_import_proto::onnx;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::attrs::AttributeDict;
use crate::config::ImportOptions;
use crate::error::{ImportError, ImportErrorKind, NodeContext};
use crate::graph_context::GraphContext;
use crate::op_registry::{
    normalize_domain, ConvertContext, ConvertScope, ConvertedNode, OpRegistry, Operand,
};

/// Converts the nodes of a graph and its subgraphs.
pub struct NodeImporter<'a> {
    registry: &'a OpRegistry,
    options: &'a ImportOptions,

    /// Map of normalized domain => opset version used for the import.
    opsets: &'a FxHashMap<String, i64>,
}

impl<'a> NodeImporter<'a> {
    pub fn new(
        registry: &'a OpRegistry,
        options: &'a ImportOptions,
        opsets: &'a FxHashMap<String, i64>,
    ) -> Self {
        NodeImporter {
            registry,
            options,
            opsets,
        }
    }

    /// Convert all nodes of a graph, in order.
    pub fn import_nodes(
        &self,
        graph: &mut GraphContext,
        nodes: &[onnx::NodeProto],
    ) -> Result<(), ImportError> {
        for (index, node) in nodes.iter().enumerate() {
            self.import_node(graph, index, node)?;
        }
        Ok(())
    }

    /// Convert a node and bind its outputs.
    ///
    /// If conversion fails, the graph is left unchanged and the error is
    /// annotated with the node.
    pub fn import_node(
        &self,
        graph: &mut GraphContext,
        index: usize,
        node: &onnx::NodeProto,
    ) -> Result<(), ImportError> {
        self.convert_node(graph, node)
            .map_err(|err| err.with_node(|| node_context(index, node)))
    }

    fn convert_node(
        &self,
        graph: &mut GraphContext,
        node: &onnx::NodeProto,
    ) -> Result<(), ImportError> {
        let op_type = node.op_type.as_deref().unwrap_or_default();
        let domain = normalize_domain(node.domain.as_deref().unwrap_or_default());

        if !self.options.domain_allowed(domain) {
            return Err(ImportErrorKind::UnknownOperator {
                op_type: op_type.to_string(),
                domain: domain.to_string(),
            }
            .into());
        }
        let opset_version = *self.opsets.get(domain).ok_or_else(|| {
            ImportError::invalid_model(format!(
                "model does not import operator domain \"{}\"",
                domain
            ))
        })?;

        let resolved = self.registry.resolve(op_type, domain, opset_version)?;
        let attrs = AttributeDict::from_proto(&node.attribute)?;
        let operands = node
            .input
            .iter()
            .map(|name| {
                if name.is_empty() {
                    Ok(Operand::Absent)
                } else {
                    graph.lookup(name).cloned().map(Operand::Value)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let hints: Vec<Option<Type>> = node
            .output
            .iter()
            .map(|name| graph.type_hint(name).cloned())
            .collect();
        let location = match node.name.as_deref() {
            Some(name) if !name.is_empty() => Location::name(name),
            _ => Location::name(graph.fresh_name(op_type)),
        };

        debug!(
            "converting {} node {:?} with converter for version {}",
            op_type, location, resolved.since_version
        );

        let shape_rule = self.registry.shape_rule(op_type, domain);
        let mut scope = NodeScope {
            importer: self,
            graph,
            staged_none: None,
            constants: Vec::new(),
        };
        let converted = {
            let mut ctx = ConvertContext::new(
                node,
                &attrs,
                &operands,
                &hints,
                shape_rule,
                opset_version,
                resolved.since_version,
                location,
                &mut scope,
            );
            resolved.convert(&mut ctx)?
        };
        scope.commit(node, converted)
    }

    /// Import a graph attribute as a region nested in `parent`.
    fn import_subgraph(
        &self,
        parent: &GraphContext,
        graph: &onnx::GraphProto,
    ) -> Result<Region, ImportError> {
        let mut ctx = parent.child();
        ctx.declare_graph(graph, None)?;
        self.import_nodes(&mut ctx, &graph.node)?;
        let outputs = ctx.resolve_outputs(graph)?;
        Ok(Region::from(ctx.into_block(OPERATOR_TERMINATOR, &outputs)))
    }
}

fn node_context(index: usize, node: &onnx::NodeProto) -> NodeContext {
    NodeContext {
        index,
        op_type: node.op_type.clone().unwrap_or_default(),
        domain: normalize_domain(node.domain.as_deref().unwrap_or_default()).to_string(),
        name: node.name.clone().filter(|name| !name.is_empty()),
    }
}

/// Scope for converting one node.
///
/// Changes to the graph are staged until the conversion succeeds.
struct NodeScope<'i, 'g, 'p> {
    importer: &'i NodeImporter<'i>,
    graph: &'g mut GraphContext<'p>,

    /// Operation defining the none value, if the node created it.
    staged_none: Option<(ValueId, Operation)>,

    /// Integer constants produced by the node.
    constants: Vec<(String, Vec<i64>)>,
}

impl NodeScope<'_, '_, '_> {
    /// Add the node's operations to the graph and bind its outputs.
    fn commit(self, node: &onnx::NodeProto, converted: ConvertedNode) -> Result<(), ImportError> {
        let ConvertedNode { ops, results } = converted;
        if results.len() != node.output.len() {
            return Err(ImportError::conversion_failed(format!(
                "converter produced {} results for {} outputs",
                results.len(),
                node.output.len()
            )));
        }

        let mut seen = FxHashSet::default();
        for name in node.output.iter().filter(|name| !name.is_empty()) {
            if !seen.insert(name.as_str()) {
                return Err(ImportErrorKind::DuplicateBinding { name: name.clone() }.into());
            }
            self.graph.check_bindable(name)?;
        }

        if let Some((id, op)) = self.staged_none {
            self.graph.add_none(id, op);
        }
        self.graph.add_ops(ops);
        for (name, value) in node.output.iter().zip(results) {
            // Omitted optional outputs still have a result in the IR, but no
            // name to bind.
            if !name.is_empty() {
                self.graph.bind(name, value)?;
            }
        }
        for (name, values) in self.constants {
            self.graph.record_constant(&name, values);
        }
        Ok(())
    }
}

impl ConvertScope for NodeScope<'_, '_, '_> {
    fn next_id(&mut self) -> ValueId {
        self.graph.ids().next_id()
    }

    fn none_value(&mut self) -> ValueId {
        if let Some(id) = self.graph.none_value() {
            return id;
        }
        if let Some((id, _)) = &self.staged_none {
            return *id;
        }
        let id = self.graph.ids().next_id();
        self.staged_none = Some((id, GraphContext::none_op(id)));
        id
    }

    fn constant(&self, name: &str) -> Option<&[i64]> {
        self.constants
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
            .or_else(|| self.graph.constant(name))
    }

    fn record_constant(&mut self, name: &str, values: Vec<i64>) {
        self.constants.push((name.to_string(), values));
    }

    fn import_subgraph(&mut self, graph: &onnx::GraphProto) -> Result<Region, ImportError> {
        self.importer.import_subgraph(self.graph, graph)
    }
}
