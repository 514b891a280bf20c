//! In-memory IR for modules produced by `onnx-import`.
//!
//! Modules contain functions whose bodies are single blocks of operations.
//! Values are identified by [`ValueId`]s and carry a [`Type`] from the
//! value-semantic `torch` type system (`!torch.vtensor`, `!torch.list`,
//! `!torch.optional`, `!torch.none`). Operations may own regions, which is
//! how control flow subgraphs are represented.
//!
//! Modules can be checked with [`verify_module`] and converted to their
//! textual form using `Display`. With the `serde` feature enabled, all IR
//! types can be serialized.

#![forbid(unsafe_code)]

mod attr;
mod op;
mod printer;
mod types;
mod value_id;
mod verify;

pub use attr::{Attribute, DenseData, DenseElements};
pub use op::{Block, Function, Location, Module, Operation, OperationBuilder, Region, Value};
pub use types::{Dim, Dims, ElementType, ParseTypeError, TensorType, Type};
pub use value_id::{ValueId, ValueIdGen};
pub use verify::{verify_function, verify_module, VerifyError, FUNC_RETURN, OPERATOR_TERMINATOR};
