//! Utilities for building ONNX protobuf messages in tests.

use onnx_import_proto::onnx;
use onnx_import_proto::onnx::tensor_shape_proto::{dimension, Dimension};
use onnx_import_proto::onnx::type_proto;

/// Value of an attribute created by [`create_attr`].
#[derive(Clone)]
pub enum AttrValue {
    Float(f32),
    Floats(Vec<f32>),
    Graph(onnx::GraphProto),
    Int(i64),
    Ints(Vec<i64>),
    String(String),
    Strings(Vec<String>),
    Tensor(onnx::TensorProto),
}

macro_rules! attr_from {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for AttrValue {
            fn from(val: $ty) -> Self {
                AttrValue::$variant(val)
            }
        }
    };
}

attr_from!(Float, f32);
attr_from!(Floats, Vec<f32>);
attr_from!(Graph, onnx::GraphProto);
attr_from!(Int, i64);
attr_from!(Ints, Vec<i64>);
attr_from!(String, String);
attr_from!(Strings, Vec<String>);
attr_from!(Tensor, onnx::TensorProto);

impl From<&str> for AttrValue {
    fn from(val: &str) -> Self {
        AttrValue::String(val.to_string())
    }
}

/// Create an attribute with the `type` field set according to the value.
pub fn create_attr(name: &str, value: AttrValue) -> onnx::AttributeProto {
    let mut attr = onnx::AttributeProto {
        name: Some(name.to_string()),
        ..Default::default()
    };
    let attr_type = match value {
        AttrValue::Float(val) => {
            attr.f = Some(val);
            onnx::AttributeType::FLOAT
        }
        AttrValue::Floats(val) => {
            attr.floats = val;
            onnx::AttributeType::FLOATS
        }
        AttrValue::Graph(val) => {
            attr.g = Some(val);
            onnx::AttributeType::GRAPH
        }
        AttrValue::Int(val) => {
            attr.i = Some(val);
            onnx::AttributeType::INT
        }
        AttrValue::Ints(val) => {
            attr.ints = val;
            onnx::AttributeType::INTS
        }
        AttrValue::String(val) => {
            attr.s = Some(val.into_bytes());
            onnx::AttributeType::STRING
        }
        AttrValue::Strings(val) => {
            attr.strings = val.into_iter().map(|s| s.into_bytes()).collect();
            onnx::AttributeType::STRINGS
        }
        AttrValue::Tensor(val) => {
            attr.t = Some(val);
            onnx::AttributeType::TENSOR
        }
    };
    attr.r#type = Some(attr_type.0);
    attr
}

/// Create a model which imports the default ONNX domain at `opset_version`.
pub fn create_model(graph: onnx::GraphProto, opset_version: i64) -> onnx::ModelProto {
    onnx::ModelProto {
        ir_version: Some(8),
        producer_name: Some("onnx-import-testing".into()),
        graph: Some(graph),
        opset_import: vec![onnx::OperatorSetIdProto {
            domain: Some(String::new()),
            version: Some(opset_version),
        }],
        ..Default::default()
    }
}

pub fn create_graph(name: &str) -> onnx::GraphProto {
    onnx::GraphProto {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn create_node(op_type: &str) -> onnx::NodeProto {
    onnx::NodeProto {
        op_type: Some(op_type.to_string()),
        ..Default::default()
    }
}

/// Fluent methods for building an [`onnx::NodeProto`].
pub trait NodeProtoExt {
    fn with_attr(self, name: &str, value: impl Into<AttrValue>) -> Self;
    fn with_domain(self, domain: &str) -> Self;
    fn with_name(self, name: &str) -> Self;
    fn with_input(self, name: &str) -> Self;
    fn with_output(self, name: &str) -> Self;
}

impl NodeProtoExt for onnx::NodeProto {
    fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attribute.push(create_attr(name, value.into()));
        self
    }

    fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    fn with_input(mut self, name: &str) -> Self {
        self.input.push(name.to_string());
        self
    }

    fn with_output(mut self, name: &str) -> Self {
        self.output.push(name.to_string());
        self
    }
}

/// Fluent methods for building an [`onnx::GraphProto`].
pub trait GraphProtoExt {
    fn with_node(self, node: onnx::NodeProto) -> Self;
    fn with_input(self, input: onnx::ValueInfoProto) -> Self;
    fn with_output(self, output: onnx::ValueInfoProto) -> Self;
    fn with_initializer(self, tensor: onnx::TensorProto) -> Self;
    fn with_value_info(self, info: onnx::ValueInfoProto) -> Self;
}

impl GraphProtoExt for onnx::GraphProto {
    fn with_node(mut self, node: onnx::NodeProto) -> Self {
        self.node.push(node);
        self
    }

    fn with_input(mut self, input: onnx::ValueInfoProto) -> Self {
        self.input.push(input);
        self
    }

    fn with_output(mut self, output: onnx::ValueInfoProto) -> Self {
        self.output.push(output);
        self
    }

    fn with_initializer(mut self, tensor: onnx::TensorProto) -> Self {
        self.initializer.push(tensor);
        self
    }

    fn with_value_info(mut self, info: onnx::ValueInfoProto) -> Self {
        self.value_info.push(info);
        self
    }
}

#[derive(Clone, Debug)]
pub enum TensorData {
    /// Tensor elements as little-endian bytes.
    Raw(Vec<u8>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int(Vec<i32>),
    Int64(Vec<i64>),
}

pub fn create_tensor(
    name: &str,
    shape: &[i64],
    dtype: onnx::DataType,
    data: TensorData,
) -> onnx::TensorProto {
    let mut tensor = onnx::TensorProto {
        name: Some(name.to_string()),
        dims: shape.to_vec(),
        data_type: Some(dtype.0),
        ..Default::default()
    };

    match data {
        TensorData::Raw(raw) => tensor.raw_data = Some(raw),
        TensorData::Float(floats) => tensor.float_data = floats,
        TensorData::Double(doubles) => tensor.double_data = doubles,
        TensorData::Int(ints) => tensor.int32_data = ints,
        TensorData::Int64(ints) => tensor.int64_data = ints,
    }

    tensor
}

/// Create a float tensor with raw data filled with zeros.
pub fn create_zeros(name: &str, shape: &[i64]) -> onnx::TensorProto {
    let len: i64 = shape.iter().product();
    create_tensor(
        name,
        shape,
        onnx::DataType::FLOAT,
        TensorData::Raw(vec![0; len as usize * 4]),
    )
}

/// Create a value info without type information.
pub fn create_value_info(name: &str) -> onnx::ValueInfoProto {
    onnx::ValueInfoProto {
        name: Some(name.into()),
        ..Default::default()
    }
}

/// Dimension of a tensor value info created by [`tensor_value_info`].
#[derive(Clone, Debug)]
pub enum Dim {
    Fixed(i64),
    Symbolic(&'static str),
    Unknown,
}

impl From<i64> for Dim {
    fn from(size: i64) -> Self {
        Dim::Fixed(size)
    }
}

impl From<&'static str> for Dim {
    fn from(name: &'static str) -> Self {
        Dim::Symbolic(name)
    }
}

pub fn tensor_type_proto(dtype: onnx::DataType, shape: Option<&[Dim]>) -> onnx::TypeProto {
    let shape = shape.map(|dims| onnx::TensorShapeProto {
        dim: dims
            .iter()
            .map(|d| Dimension {
                value: match d {
                    Dim::Fixed(size) => Some(dimension::Value::DimValue(*size)),
                    Dim::Symbolic(name) => Some(dimension::Value::DimParam(name.to_string())),
                    Dim::Unknown => None,
                },
            })
            .collect(),
    });
    onnx::TypeProto {
        value: Some(type_proto::Value::TensorType(type_proto::Tensor {
            elem_type: Some(dtype.0),
            shape,
        })),
    }
}

/// Create a value info for a ranked tensor.
pub fn tensor_value_info(
    name: &str,
    dtype: onnx::DataType,
    shape: &[Dim],
) -> onnx::ValueInfoProto {
    onnx::ValueInfoProto {
        name: Some(name.into()),
        r#type: Some(tensor_type_proto(dtype, Some(shape))),
    }
}

/// Create a value info for a float tensor with fixed dimensions.
pub fn f32_value_info(name: &str, shape: &[i64]) -> onnx::ValueInfoProto {
    let dims: Vec<Dim> = shape.iter().map(|&d| Dim::Fixed(d)).collect();
    tensor_value_info(name, onnx::DataType::FLOAT, &dims)
}
