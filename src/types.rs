//! Conversion of ONNX types and tensors to IR types and attributes.

use onnx_import_ir::{DenseData, DenseElements, Dim, ElementType, TensorType, Type};
use onnx_import_proto::onnx;
use onnx_import_proto::onnx::tensor_shape_proto::dimension;
use onnx_import_proto::onnx::type_proto;

/// Map an ONNX `TensorProto.DataType` code to an element type.
pub fn element_type(data_type: i32) -> Result<ElementType, String> {
    type D = onnx::DataType;

    let elem = match onnx::DataType(data_type) {
        D::FLOAT => ElementType::F32,
        D::UINT8 => ElementType::UInt(8),
        D::INT8 => ElementType::SInt(8),
        D::UINT16 => ElementType::UInt(16),
        D::INT16 => ElementType::SInt(16),
        D::INT32 => ElementType::SInt(32),
        D::INT64 => ElementType::SInt(64),
        D::STRING => ElementType::String,
        D::BOOL => ElementType::Bool,
        D::FLOAT16 => ElementType::F16,
        D::DOUBLE => ElementType::F64,
        D::UINT32 => ElementType::UInt(32),
        D::UINT64 => ElementType::UInt(64),
        D::COMPLEX64 => ElementType::Complex64,
        D::COMPLEX128 => ElementType::Complex128,
        D::BFLOAT16 => ElementType::BF16,
        D::FLOAT8E4M3FN => ElementType::F8E4M3FN,
        D::FLOAT8E4M3FNUZ => ElementType::F8E4M3FNUZ,
        D::FLOAT8E5M2 => ElementType::F8E5M2,
        D::FLOAT8E5M2FNUZ => ElementType::F8E5M2FNUZ,
        D::UINT4 => ElementType::UInt(4),
        D::INT4 => ElementType::SInt(4),
        _ => return Err(format!("unknown ONNX tensor element type {}", data_type)),
    };
    Ok(elem)
}

fn tensor_type_from_proto(tt: &type_proto::Tensor) -> Result<TensorType, String> {
    let elem = match tt.elem_type {
        Some(code) if code != onnx::DataType::UNDEFINED.0 => element_type(code)?,
        _ => return Err("tensor type has no element type".into()),
    };
    let Some(shape) = &tt.shape else {
        return Ok(TensorType::unranked(elem));
    };

    // A dimension is dynamic if it has a symbolic name or no value at all.
    let dims = shape.dim.iter().map(|d| match d.value {
        Some(dimension::Value::DimValue(size)) => Dim::Fixed(size),
        Some(dimension::Value::DimParam(_)) | None => Dim::Dynamic,
    });
    Ok(TensorType {
        dims: Some(dims.collect()),
        elem,
    })
}

/// Convert an ONNX type to an IR type.
///
/// Sequences map to lists of tensors and optionals map to optional tensors
/// or lists. An empty type (no variant set) maps to the none type.
pub fn type_from_proto(tp: &onnx::TypeProto) -> Result<Type, String> {
    match &tp.value {
        Some(type_proto::Value::TensorType(tt)) => Ok(Type::Tensor(tensor_type_from_proto(tt)?)),
        Some(type_proto::Value::SequenceType(seq)) => {
            let item = list_item_type(seq.elem_type.as_deref())?;
            Ok(Type::List(Box::new(item)))
        }
        Some(type_proto::Value::OptionalType(opt)) => {
            let item = match opt.elem_type.as_deref().and_then(|t| t.value.as_ref()) {
                Some(type_proto::Value::TensorType(tt)) => {
                    Type::Tensor(tensor_type_from_proto(tt)?)
                }
                Some(type_proto::Value::SequenceType(seq)) => {
                    Type::List(Box::new(list_item_type(seq.elem_type.as_deref())?))
                }
                _ => return Err("unsupported optional element type".into()),
            };
            Ok(Type::Optional(Box::new(item)))
        }
        None => Ok(Type::None),
    }
}

fn list_item_type(elem_type: Option<&onnx::TypeProto>) -> Result<Type, String> {
    match elem_type.and_then(|t| t.value.as_ref()) {
        Some(type_proto::Value::TensorType(tt)) => Ok(Type::Tensor(tensor_type_from_proto(tt)?)),
        _ => Err("unsupported list element type".into()),
    }
}

/// Return the type of a constant tensor.
pub fn tensor_type(tensor: &onnx::TensorProto) -> Result<Type, String> {
    let elem = element_type(tensor.data_type.unwrap_or_default())?;
    Ok(Type::tensor(elem, tensor.dims.iter().copied()))
}

/// Convert packed integers in `int32_data` to little-endian bytes of
/// `width` bytes each.
fn int32_data_to_raw(values: &[i32], width: usize) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| v.to_le_bytes().into_iter().take(width))
        .collect()
}

/// Convert a constant tensor to a dense elements attribute.
///
/// Raw data is carried over as bytes. Data stored in the typed fields of the
/// tensor is converted to the closest typed representation, or to bytes for
/// element types which are stored as bit patterns (eg. float16).
pub fn dense_from_tensor(tensor: &onnx::TensorProto) -> Result<DenseElements, String> {
    let name = tensor.name.as_deref().unwrap_or_default();
    let elem = element_type(tensor.data_type.unwrap_or_default())?;
    let shape = tensor.dims.clone();

    if tensor.data_location == Some(onnx::DataLocation::EXTERNAL.0) {
        return Err(format!("tensor \"{}\" uses external data, which is not supported", name));
    }
    let string_error = || {
        format!(
            "tensor \"{}\" has string elements, which are not supported",
            name
        )
    };
    if elem == ElementType::String {
        return Err(string_error());
    }

    let dense = if let Some(raw) = &tensor.raw_data {
        DenseElements::new(shape, elem, DenseData::Raw(raw.clone()))
    } else {
        let data = match elem {
            ElementType::F32 => DenseData::Floats(tensor.float_data.clone()),
            ElementType::F64 => DenseData::Doubles(tensor.double_data.clone()),
            ElementType::SInt(64) => DenseData::Ints(tensor.int64_data.clone()),
            ElementType::UInt(32) | ElementType::UInt(64) => {
                DenseData::UInts(tensor.uint64_data.clone())
            }
            ElementType::SInt(_) | ElementType::UInt(_) | ElementType::Bool => {
                DenseData::Ints(tensor.int32_data.iter().map(|&x| x as i64).collect())
            }
            ElementType::F16 | ElementType::BF16 => {
                DenseData::Raw(int32_data_to_raw(&tensor.int32_data, 2))
            }
            ElementType::F8E4M3FN
            | ElementType::F8E4M3FNUZ
            | ElementType::F8E5M2
            | ElementType::F8E5M2FNUZ => DenseData::Raw(int32_data_to_raw(&tensor.int32_data, 1)),
            ElementType::Complex64 => DenseData::Raw(
                tensor.float_data.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ),
            ElementType::Complex128 => DenseData::Raw(
                tensor.double_data.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ),
            ElementType::String => return Err(string_error()),
        };
        DenseElements::new(shape, elem, data)
    };

    check_dense_size(name, &dense)?;
    Ok(dense)
}

fn check_dense_size(name: &str, dense: &DenseElements) -> Result<(), String> {
    let too_large = || format!("tensor \"{}\" shape {:?} is too large", name, dense.shape);
    let count = dense.num_elements().ok_or_else(too_large)?;
    match &dense.data {
        DenseData::Raw(bytes) => {
            let bits = dense.elem.bit_width().unwrap_or(8) as usize;
            let expected = count.checked_mul(bits).ok_or_else(too_large)?.div_ceil(8);
            if bytes.len() != expected {
                return Err(format!(
                    "tensor \"{}\" has {} bytes of data but its shape requires {}",
                    name,
                    bytes.len(),
                    expected
                ));
            }
        }
        data => {
            let len = data.typed_len().unwrap_or_default();
            if len != count {
                return Err(format!(
                    "tensor \"{}\" has {} elements but its shape requires {}",
                    name, len, count
                ));
            }
        }
    }
    Ok(())
}

/// Return the value of a signed integer scalar or vector constant.
///
/// These are the constants which shape rules read operator parameters such as
/// axes from.
pub fn int_constant(tensor: &onnx::TensorProto) -> Option<Vec<i64>> {
    if tensor.dims.len() > 1 {
        return None;
    }
    match element_type(tensor.data_type.unwrap_or_default()) {
        Ok(ElementType::SInt(32 | 64)) => dense_from_tensor(tensor).ok()?.to_i64_vec(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use onnx_import_ir::{DenseData, Dim, ElementType, TensorType, Type};
    use onnx_import_proto::onnx;
    use onnx_import_proto::onnx::type_proto;
    use onnx_import_testing::onnx::{create_tensor, tensor_type_proto, Dim as ProtoDim, TensorData};
    use onnx_import_testing::TestCases;

    use super::{dense_from_tensor, element_type, int_constant, type_from_proto};

    #[test]
    fn test_element_type() {
        assert_eq!(element_type(onnx::DataType::FLOAT.0), Ok(ElementType::F32));
        assert_eq!(element_type(onnx::DataType::BOOL.0), Ok(ElementType::Bool));
        assert_eq!(element_type(onnx::DataType::UINT4.0), Ok(ElementType::UInt(4)));
        assert_eq!(
            element_type(99),
            Err("unknown ONNX tensor element type 99".to_string())
        );
    }

    #[test]
    fn test_type_from_proto() {
        #[derive(Debug)]
        struct Case {
            proto: onnx::TypeProto,
            expected: Result<Type, String>,
        }

        let f32_tensor = tensor_type_proto(
            onnx::DataType::FLOAT,
            Some(&[ProtoDim::Fixed(2), ProtoDim::Symbolic("batch"), ProtoDim::Unknown][..]),
        );

        let cases = [
            Case {
                proto: f32_tensor.clone(),
                expected: Ok(Type::Tensor(TensorType::new(
                    ElementType::F32,
                    [Dim::Fixed(2), Dim::Dynamic, Dim::Dynamic],
                ))),
            },
            Case {
                proto: tensor_type_proto(onnx::DataType::INT64, None),
                expected: Ok(Type::Tensor(TensorType::unranked(ElementType::SInt(64)))),
            },
            Case {
                proto: onnx::TypeProto {
                    value: Some(type_proto::Value::SequenceType(type_proto::Sequence {
                        elem_type: Some(Box::new(f32_tensor.clone())),
                    })),
                },
                expected: Ok(Type::List(Box::new(Type::Tensor(TensorType::new(
                    ElementType::F32,
                    [Dim::Fixed(2), Dim::Dynamic, Dim::Dynamic],
                ))))),
            },
            Case {
                proto: onnx::TypeProto {
                    value: Some(type_proto::Value::OptionalType(type_proto::Optional {
                        elem_type: None,
                    })),
                },
                expected: Err("unsupported optional element type".into()),
            },
            Case {
                proto: onnx::TypeProto::default(),
                expected: Ok(Type::None),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(type_from_proto(&case.proto), case.expected);
        })
    }

    #[test]
    fn test_dense_from_tensor() {
        let raw = create_tensor(
            "w",
            &[2],
            onnx::DataType::FLOAT,
            TensorData::Raw(vec![0, 0, 128, 63, 0, 0, 0, 64]),
        );
        let dense = dense_from_tensor(&raw).unwrap();
        assert_eq!(dense.shape, [2]);
        assert_eq!(dense.data, DenseData::Raw(vec![0, 0, 128, 63, 0, 0, 0, 64]));

        let ints = create_tensor("i", &[3], onnx::DataType::INT32, TensorData::Int(vec![1, 2, 3]));
        let dense = dense_from_tensor(&ints).unwrap();
        assert_eq!(dense.elem, ElementType::SInt(32));
        assert_eq!(dense.data, DenseData::Ints(vec![1, 2, 3]));

        let halfs = create_tensor(
            "h",
            &[1],
            onnx::DataType::FLOAT16,
            TensorData::Int(vec![0x3c00]),
        );
        let dense = dense_from_tensor(&halfs).unwrap();
        assert_eq!(dense.data, DenseData::Raw(vec![0x00, 0x3c]));

        let short = create_tensor("s", &[2, 2], onnx::DataType::INT64, TensorData::Int64(vec![1]));
        assert_eq!(
            dense_from_tensor(&short).err().unwrap(),
            "tensor \"s\" has 1 elements but its shape requires 4"
        );

        let strings = create_tensor("t", &[0], onnx::DataType::STRING, TensorData::Raw(Vec::new()));
        assert!(dense_from_tensor(&strings).is_err());

        let huge = create_tensor(
            "big",
            &[1 << 40, 1 << 40],
            onnx::DataType::FLOAT,
            TensorData::Raw(Vec::new()),
        );
        assert_eq!(
            dense_from_tensor(&huge).err().unwrap(),
            "tensor \"big\" shape [1099511627776, 1099511627776] is too large"
        );
    }

    #[test]
    fn test_int_constant() {
        let axes = create_tensor(
            "axes",
            &[2],
            onnx::DataType::INT64,
            TensorData::Int64(vec![0, -1]),
        );
        assert_eq!(int_constant(&axes), Some(vec![0, -1]));

        let raw = create_tensor(
            "k",
            &[],
            onnx::DataType::INT32,
            TensorData::Raw(5i32.to_le_bytes().to_vec()),
        );
        assert_eq!(int_constant(&raw), Some(vec![5]));

        let matrix = create_tensor("m", &[1, 1], onnx::DataType::INT64, TensorData::Int64(vec![1]));
        assert_eq!(int_constant(&matrix), None);

        let floats = create_tensor("f", &[1], onnx::DataType::FLOAT, TensorData::Float(vec![1.]));
        assert_eq!(int_constant(&floats), None);
    }
}
