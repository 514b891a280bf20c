use std::fmt;
use std::fmt::Display;

use crate::types::ElementType;

/// Element data of a dense tensor attribute.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DenseData {
    /// Elements in packed little-endian order.
    Raw(Vec<u8>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
    /// Signed integer or boolean elements.
    Ints(Vec<i64>),
    UInts(Vec<u64>),
}

impl DenseData {
    /// Return the number of typed elements, or `None` for raw data.
    pub fn typed_len(&self) -> Option<usize> {
        match self {
            Self::Raw(_) => None,
            Self::Floats(v) => Some(v.len()),
            Self::Doubles(v) => Some(v.len()),
            Self::Ints(v) => Some(v.len()),
            Self::UInts(v) => Some(v.len()),
        }
    }
}

/// A constant tensor stored in an attribute.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DenseElements {
    pub shape: Vec<i64>,
    pub elem: ElementType,
    pub data: DenseData,
}

impl DenseElements {
    pub fn new(shape: Vec<i64>, elem: ElementType, data: DenseData) -> Self {
        DenseElements { shape, elem, data }
    }

    /// Return the number of elements implied by the shape, or `None` if the
    /// count does not fit in a `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |count, &d| {
            count.checked_mul(usize::try_from(d.max(0)).ok()?)
        })
    }

    /// Read the elements as signed integers.
    ///
    /// Returns `None` if the element type is not an integer type or the data
    /// is incomplete.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        let values: Option<Vec<i64>> = match (&self.data, self.elem) {
            (DenseData::Ints(values), _) => Some(values.clone()),
            (DenseData::UInts(values), _) => {
                values.iter().map(|&v| i64::try_from(v).ok()).collect()
            }
            (DenseData::Raw(bytes), ElementType::SInt(64)) => Some(
                bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            (DenseData::Raw(bytes), ElementType::SInt(32)) => Some(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                    .collect(),
            ),
            _ => None,
        };
        values.filter(|values| Some(values.len()) == self.num_elements())
    }

    /// Write the builtin tensor type of this constant, eg. `tensor<3x4xf32>`.
    fn fmt_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<")?;
        for dim in &self.shape {
            write!(f, "{}x", dim)?;
        }
        write!(f, "{}>", self.elem)
    }
}

/// Write `values` as a nested list following `shape`.
fn fmt_nested<T: fmt::Debug>(
    f: &mut fmt::Formatter<'_>,
    values: &[T],
    shape: &[i64],
) -> fmt::Result {
    let Some((&outer, inner)) = shape.split_first() else {
        return match values.first() {
            Some(v) => write!(f, "{:?}", v),
            None => Ok(()),
        };
    };
    let outer = outer.max(0) as usize;
    let chunk = if outer == 0 { 0 } else { values.len() / outer };
    write!(f, "[")?;
    for i in 0..outer {
        if i > 0 {
            write!(f, ", ")?;
        }
        fmt_nested(f, &values[i * chunk..(i + 1) * chunk], inner)?;
    }
    write!(f, "]")
}

impl Display for DenseElements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dense<")?;
        match &self.data {
            DenseData::Raw(bytes) => {
                write!(f, "\"0x")?;
                for byte in bytes {
                    write!(f, "{:02X}", byte)?;
                }
                write!(f, "\"")?;
            }
            DenseData::Floats(v) => fmt_nested(f, v, &self.shape)?,
            DenseData::Doubles(v) => fmt_nested(f, v, &self.shape)?,
            DenseData::Ints(v) if self.elem == ElementType::Bool => {
                let bools: Vec<bool> = v.iter().map(|&x| x != 0).collect();
                fmt_nested(f, &bools, &self.shape)?
            }
            DenseData::Ints(v) => fmt_nested(f, v, &self.shape)?,
            DenseData::UInts(v) => fmt_nested(f, v, &self.shape)?,
        }
        write!(f, "> : ")?;
        self.fmt_type(f)
    }
}

/// Value of an operation or function attribute.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Attribute {
    /// A signed 64-bit integer.
    Int(i64),
    Float(f32),
    String(String),
    Array(Vec<Attribute>),
    Dense(DenseElements),
    /// Dictionary with entries in insertion order.
    Dict(Vec<(String, Attribute)>),
}

impl Attribute {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<i64> for Attribute {
    fn from(val: i64) -> Self {
        Attribute::Int(val)
    }
}

impl From<f32> for Attribute {
    fn from(val: f32) -> Self {
        Attribute::Float(val)
    }
}

impl From<&str> for Attribute {
    fn from(val: &str) -> Self {
        Attribute::String(val.to_string())
    }
}

impl From<String> for Attribute {
    fn from(val: String) -> Self {
        Attribute::String(val)
    }
}

impl From<DenseElements> for Attribute {
    fn from(val: DenseElements) -> Self {
        Attribute::Dense(val)
    }
}

/// Write a key of an attribute dictionary, quoting it if it is not a valid
/// bare identifier.
pub(crate) fn fmt_attr_key(f: &mut fmt::Formatter<'_>, key: &str) -> fmt::Result {
    let bare = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if bare {
        write!(f, "{}", key)
    } else {
        write!(f, "{:?}", key)
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{} : si64", i),
            Self::Float(x) => write!(f, "{:?} : f32", x),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Dense(dense) => write!(f, "{}", dense),
            Self::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, val)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_attr_key(f, key)?;
                    write!(f, " = {}", val)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use onnx_import_testing::TestCases;

    use super::{Attribute, DenseData, DenseElements};
    use crate::types::ElementType;

    #[test]
    fn test_attribute_display() {
        #[derive(Debug)]
        struct Case {
            attr: Attribute,
            expected: &'static str,
        }

        let cases = [
            Case {
                attr: Attribute::Int(-1),
                expected: "-1 : si64",
            },
            Case {
                attr: Attribute::Float(0.5),
                expected: "0.5 : f32",
            },
            Case {
                attr: "NOTSET".into(),
                expected: "\"NOTSET\"",
            },
            Case {
                attr: Attribute::Array(vec![Attribute::Int(1), Attribute::Int(2)]),
                expected: "[1 : si64, 2 : si64]",
            },
            Case {
                attr: Attribute::Dict(vec![("ai.onnx.ml".into(), Attribute::Int(3))]),
                expected: "{ai.onnx.ml = 3 : si64}",
            },
            Case {
                attr: Attribute::Dense(DenseElements::new(
                    vec![2],
                    ElementType::F32,
                    DenseData::Raw(vec![0, 0, 128, 63, 0, 0, 0, 64]),
                )),
                expected: "dense<\"0x0000803F00000040\"> : tensor<2xf32>",
            },
            Case {
                attr: Attribute::Dense(DenseElements::new(
                    vec![2, 2],
                    ElementType::SInt(64),
                    DenseData::Ints(vec![1, 2, 3, 4]),
                )),
                expected: "dense<[[1, 2], [3, 4]]> : tensor<2x2xsi64>",
            },
            Case {
                attr: Attribute::Dense(DenseElements::new(
                    vec![],
                    ElementType::Bool,
                    DenseData::Ints(vec![1]),
                )),
                expected: "dense<true> : tensor<i1>",
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.attr.to_string(), case.expected);
        })
    }

    #[test]
    fn test_dense_num_elements() {
        let dense =
            DenseElements::new(vec![2, 3], ElementType::F32, DenseData::Floats(vec![0.; 6]));
        assert_eq!(dense.num_elements(), Some(6));

        let scalar = DenseElements::new(vec![], ElementType::SInt(64), DenseData::Ints(vec![1]));
        assert_eq!(scalar.num_elements(), Some(1));

        let huge = DenseElements::new(
            vec![1 << 40, 1 << 40],
            ElementType::F32,
            DenseData::Raw(Vec::new()),
        );
        assert_eq!(huge.num_elements(), None);
    }

    #[test]
    fn test_dense_to_i64_vec() {
        let raw = DenseElements::new(
            vec![2],
            ElementType::SInt(64),
            DenseData::Raw([3i64, -1].iter().flat_map(|x| x.to_le_bytes()).collect()),
        );
        assert_eq!(raw.to_i64_vec(), Some(vec![3, -1]));

        let floats = DenseElements::new(vec![1], ElementType::F32, DenseData::Floats(vec![1.0]));
        assert_eq!(floats.to_i64_vec(), None);

        let truncated =
            DenseElements::new(vec![3], ElementType::SInt(64), DenseData::Ints(vec![1]));
        assert_eq!(truncated.to_i64_vec(), None);
    }
}
