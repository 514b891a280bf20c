//! This crate provides the in-memory representation of [ONNX][onnx] models
//! consumed by `onnx-import`.
//!
//! # About ONNX models
//!
//! ONNX models are [Protocol Buffers][protobuf] messages using the `ModelProto`
//! schema from
//! [onnx.proto](https://github.com/onnx/onnx/blob/main/onnx/onnx.proto). The
//! `ModelProto` message describes the model structure as a graph of operator
//! nodes, plus named constant tensors ("initializers") and the declared
//! inputs and outputs of the graph.
//!
//! # Usage
//!
//! To read a model from an in-memory buffer:
//!
//! ```no_run
//! use onnx_import_proto::Message;
//! use onnx_import_proto::onnx::ModelProto;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let buffer = std::fs::read("model.onnx")?;
//! let model = ModelProto::decode(buffer.as_slice())?;
//!
//! let op_count = model.graph.as_ref().map(|g| g.node.len()).unwrap_or(0);
//! println!("Model has {} operators", op_count);
//! # Ok(()) }
//! ```
//!
//! The message types only contain the fields which are used by the importer.
//! Unknown fields are skipped when decoding.
//!
//! [onnx]: https://onnx.ai/onnx/
//! [protobuf]: https://protobuf.dev/

#![forbid(unsafe_code)]

pub mod onnx;

pub use prost::{DecodeError, Message};
