use log::info;
use onnx_import_ir::{
    verify_module, Attribute, Function, Location, Module, ValueIdGen, FUNC_RETURN,
};
use onnx_import_proto::onnx;
use rustc_hash::FxHashMap;

use crate::config::ImportOptions;
use crate::error::ImportError;
use crate::graph_context::GraphContext;
use crate::node_importer::NodeImporter;
use crate::op_registry::{normalize_domain, OpRegistry};

/// Prefix of function attributes holding model metadata.
const META_PREFIX: &str = "torch.onnx_meta";

/// Import an ONNX model as a module containing one function.
///
/// The function's parameters are the main graph's inputs, excluding inputs
/// which have initializers unless
/// [`ImportOptions::elide_initialized_inputs`] is disabled. Its results are
/// the graph's outputs.
///
/// Import is all-or-nothing: the first failure aborts the import.
pub fn import_model(
    model: &onnx::ModelProto,
    registry: &OpRegistry,
    options: &ImportOptions,
) -> Result<Module, ImportError> {
    let graph = model
        .graph
        .as_ref()
        .ok_or_else(|| ImportError::invalid_model("model has no graph"))?;
    let graph_name = graph.name.as_deref().unwrap_or_default();
    let opsets = opset_versions(model, options)?;

    info!(
        "importing graph \"{}\" with {} nodes and {} initializers",
        graph_name,
        graph.node.len(),
        graph.initializer.len()
    );

    let ids = ValueIdGen::new();
    let mut ctx = GraphContext::new(&ids);
    ctx.declare_graph(graph, Some(options))?;

    let importer = NodeImporter::new(registry, options, &opsets);
    importer.import_nodes(&mut ctx, &graph.node)?;

    let outputs = ctx.resolve_outputs(graph)?;
    let result_types = outputs.iter().map(|v| v.ty.clone()).collect();
    let body = ctx.into_block(FUNC_RETURN, &outputs);

    let func_name = match (&options.function_name, graph_name) {
        (Some(name), _) => name.as_str(),
        (None, "") => "main",
        (None, name) => name,
    };
    let func = Function::new(
        func_name,
        result_types,
        metadata_attributes(model, &opsets),
        body,
        Location::name(format!("graph:{}", graph_name)),
    );
    let module = Module::new(vec![func]);
    verify_module(&module)?;

    info!(
        "imported function \"{}\" with {} values",
        func_name,
        ids.count()
    );

    Ok(module)
}

/// Return the opset version used for each operator domain, keyed by
/// normalized domain name.
fn opset_versions(
    model: &onnx::ModelProto,
    options: &ImportOptions,
) -> Result<FxHashMap<String, i64>, ImportError> {
    let mut opsets = FxHashMap::default();
    for opset in &model.opset_import {
        let domain = normalize_domain(opset.domain.as_deref().unwrap_or_default());
        let version = opset.version.unwrap_or_default();
        if opsets.insert(domain.to_string(), version).is_some() {
            return Err(ImportError::invalid_model(format!(
                "opset for domain \"{}\" is declared more than once",
                domain
            )));
        }
    }
    if let Some(version) = options.opset_version {
        opsets.insert(String::new(), version);
    }
    Ok(opsets)
}

/// Create the function attributes describing the model.
fn metadata_attributes(
    model: &onnx::ModelProto,
    opsets: &FxHashMap<String, i64>,
) -> Vec<(String, Attribute)> {
    let mut attrs = Vec::new();
    let mut add = |name: &str, value: Attribute| {
        attrs.push((format!("{}.{}", META_PREFIX, name), value));
    };

    add("ir_version", Attribute::Int(model.ir_version.unwrap_or_default()));
    if let Some(&version) = opsets.get("") {
        if version != 0 {
            add("opset_version", Attribute::Int(version));
        }
    }

    // Other domains, in the order the model declares them.
    let other_domains: Vec<(String, Attribute)> = model
        .opset_import
        .iter()
        .filter_map(|opset| {
            let domain = normalize_domain(opset.domain.as_deref().unwrap_or_default());
            (!domain.is_empty()).then(|| {
                (
                    domain.to_string(),
                    Attribute::Int(opset.version.unwrap_or_default()),
                )
            })
        })
        .collect();
    if !other_domains.is_empty() {
        add("opset_versions", Attribute::Dict(other_domains));
    }

    for (name, value) in [
        ("producer_name", &model.producer_name),
        ("producer_version", &model.producer_version),
    ] {
        add(name, Attribute::from(value.as_deref().unwrap_or_default()));
    }

    attrs
}
