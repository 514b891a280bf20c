//! onnx-import converts [ONNX](https://onnx.ai) models into modules of a
//! value-semantic, torch-dialect style IR.
//!
//! # Importing models
//!
//! The basic workflow for importing a model is:
//!
//! 1. Decode the model into an [`onnx::ModelProto`](onnx_import_proto::onnx::ModelProto)
//!    using [onnx-import-proto](onnx_import_proto).
//! 2. Create an [`OpRegistry`] holding converters for the operators the model
//!    uses. [`OpRegistry::with_all_ops`] registers converters for the default
//!    ONNX domain.
//! 3. Call [`import_model`] with the registry and [`ImportOptions`].
//! 4. Print the resulting [`Module`](onnx_import_ir::Module) or serialize it
//!    with the `serde` feature.
//!
//! ```no_run
//! use onnx_import::{import_model, ImportOptions, OpRegistry};
//! use onnx_import_proto::{onnx::ModelProto, Message};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let buffer = std::fs::read("model.onnx")?;
//! let model = ModelProto::decode(buffer.as_slice())?;
//! let module = import_model(&model, &OpRegistry::with_all_ops(), &ImportOptions::default())?;
//! println!("{}", module);
//! # Ok(()) }
//! ```
//!
//! # Operators
//!
//! Each node becomes a `torch.operator` op named `onnx.<OpType>`, with the
//! node's attributes carried as `torch.onnx.<name>` attributes. Graph
//! attributes of control flow operators (`If`, `Loop`, `Scan`) become
//! regions of the op.
//!
//! The converter for a node is chosen by operator name, domain and the opset
//! version the model imports for the domain. The converter registered with
//! the highest version not exceeding the model's opset is used. Custom
//! converters can be added with [`OpRegistry::register`].
//!
//! # Types
//!
//! Result types of nodes come from the model's declared value types where
//! present, or are otherwise inferred by a [`ShapeRule`] registered for the
//! operator. Values whose type cannot be determined are given the none type
//! and a warning is logged.

#![forbid(unsafe_code)]

mod attrs;
mod config;
mod error;
mod graph_context;
mod module_builder;
mod node_importer;
mod op_registry;
mod types;

pub use attrs::{AttrKind, AttrValue, AttributeDict};
pub use config::{ImportOptions, TypeOverride};
pub use error::{ImportError, ImportErrorKind, NodeContext};
pub use module_builder::import_model;
pub use op_registry::{
    ConvertContext, ConvertFunction, ConvertResult, ConvertScope, ConvertedNode, OpRegistry,
    Operand, ResolvedOp, ShapeInputs, ShapeRule,
};
