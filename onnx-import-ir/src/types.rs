use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use smallvec::SmallVec;

/// Element type of a tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementType {
    F16,
    BF16,
    F32,
    F64,
    /// Signed integer with the given bit width.
    SInt(u8),
    /// Unsigned integer with the given bit width.
    UInt(u8),
    /// Signless 1-bit integer, used for booleans.
    Bool,
    Complex64,
    Complex128,
    F8E4M3FN,
    F8E4M3FNUZ,
    F8E5M2,
    F8E5M2FNUZ,
    String,
}

impl ElementType {
    /// Return the size of one element in bits, or `None` for variable-size
    /// elements (strings).
    pub fn bit_width(self) -> Option<u32> {
        let bits = match self {
            Self::F16 | Self::BF16 => 16,
            Self::F32 => 32,
            Self::F64 => 64,
            Self::SInt(bits) | Self::UInt(bits) => bits as u32,
            Self::Bool => 8,
            Self::Complex64 => 64,
            Self::Complex128 => 128,
            Self::F8E4M3FN | Self::F8E4M3FNUZ | Self::F8E5M2 | Self::F8E5M2FNUZ => 8,
            Self::String => return None,
        };
        Some(bits)
    }

    /// Return true if this is a floating point type (excluding complex).
    pub fn is_float(self) -> bool {
        matches!(
            self,
            Self::F16
                | Self::BF16
                | Self::F32
                | Self::F64
                | Self::F8E4M3FN
                | Self::F8E4M3FNUZ
                | Self::F8E5M2
                | Self::F8E5M2FNUZ
        )
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F16 => write!(f, "f16"),
            Self::BF16 => write!(f, "bf16"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
            Self::SInt(bits) => write!(f, "si{}", bits),
            Self::UInt(bits) => write!(f, "ui{}", bits),
            Self::Bool => write!(f, "i1"),
            Self::Complex64 => write!(f, "complex<f32>"),
            Self::Complex128 => write!(f, "complex<f64>"),
            Self::F8E4M3FN => write!(f, "f8E4M3FN"),
            Self::F8E4M3FNUZ => write!(f, "f8E4M3FNUZ"),
            Self::F8E5M2 => write!(f, "f8E5M2"),
            Self::F8E5M2FNUZ => write!(f, "f8E5M2FNUZ"),
            Self::String => write!(f, "!torch.str"),
        }
    }
}

/// Error returned when parsing an [`ElementType`] from a string fails.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseTypeError(String);

impl Display for ParseTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown element type \"{}\"", self.0)
    }
}

impl Error for ParseTypeError {}

impl FromStr for ElementType {
    type Err = ParseTypeError;

    /// Parse an element type from the spelling used by its `Display` impl.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let elem = match s {
            "f16" => Self::F16,
            "bf16" => Self::BF16,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "i1" => Self::Bool,
            "complex<f32>" => Self::Complex64,
            "complex<f64>" => Self::Complex128,
            "f8E4M3FN" => Self::F8E4M3FN,
            "f8E4M3FNUZ" => Self::F8E4M3FNUZ,
            "f8E5M2" => Self::F8E5M2,
            "f8E5M2FNUZ" => Self::F8E5M2FNUZ,
            "!torch.str" | "str" => Self::String,
            _ => {
                let (signed, bits) = if let Some(bits) = s.strip_prefix("si") {
                    (true, bits)
                } else if let Some(bits) = s.strip_prefix("ui") {
                    (false, bits)
                } else {
                    return Err(ParseTypeError(s.to_string()));
                };
                match bits.parse::<u8>() {
                    Ok(bits @ (4 | 8 | 16 | 32 | 64)) if signed => Self::SInt(bits),
                    Ok(bits @ (4 | 8 | 16 | 32 | 64)) => Self::UInt(bits),
                    _ => return Err(ParseTypeError(s.to_string())),
                }
            }
        };
        Ok(elem)
    }
}

/// Size of a tensor dimension.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dim {
    Fixed(i64),
    Dynamic,
}

impl Dim {
    pub fn fixed(self) -> Option<i64> {
        match self {
            Self::Fixed(size) => Some(size),
            Self::Dynamic => None,
        }
    }
}

impl From<i64> for Dim {
    fn from(size: i64) -> Self {
        Dim::Fixed(size)
    }
}

impl From<Option<i64>> for Dim {
    fn from(size: Option<i64>) -> Self {
        size.map(Dim::Fixed).unwrap_or(Dim::Dynamic)
    }
}

impl Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "{}", size),
            Self::Dynamic => write!(f, "?"),
        }
    }
}

pub type Dims = SmallVec<[Dim; 4]>;

/// Type of a value-semantic tensor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorType {
    /// Dimension sizes, or `None` if the rank is unknown.
    pub dims: Option<Dims>,
    pub elem: ElementType,
}

impl TensorType {
    /// Create a ranked tensor type.
    pub fn new(elem: ElementType, dims: impl IntoIterator<Item = impl Into<Dim>>) -> Self {
        TensorType {
            dims: Some(dims.into_iter().map(|d| d.into()).collect()),
            elem,
        }
    }

    /// Create a tensor type of unknown rank.
    pub fn unranked(elem: ElementType) -> Self {
        TensorType { dims: None, elem }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|d| d.len())
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        self.dims.as_deref()
    }

    fn fmt_body(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vtensor<")?;
        match &self.dims {
            Some(dims) => {
                write!(f, "[")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", dim)?;
                }
                write!(f, "]")?;
            }
            None => write!(f, "*")?,
        }
        write!(f, ",{}>", self.elem)
    }
}

/// Type of a value in a module.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    Tensor(TensorType),
    /// A list whose items have the given type.
    List(Box<Type>),
    /// A value which is either `None` or of the given type.
    Optional(Box<Type>),
    /// The type of the unique none value.
    None,
}

impl Type {
    /// Shorthand for creating a ranked tensor type.
    pub fn tensor(elem: ElementType, dims: impl IntoIterator<Item = impl Into<Dim>>) -> Type {
        Type::Tensor(TensorType::new(elem, dims))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(tt) => Some(tt),
            _ => None,
        }
    }

    fn fmt_body(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tt) => tt.fmt_body(f),
            Type::List(item) => {
                write!(f, "list<")?;
                item.fmt_body(f)?;
                write!(f, ">")
            }
            Type::Optional(item) => {
                write!(f, "optional<")?;
                item.fmt_body(f)?;
                write!(f, ">")
            }
            Type::None => write!(f, "none"),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!torch.")?;
        self.fmt_body(f)
    }
}

impl From<TensorType> for Type {
    fn from(tt: TensorType) -> Type {
        Type::Tensor(tt)
    }
}

#[cfg(test)]
mod tests {
    use onnx_import_testing::TestCases;

    use super::{Dim, ElementType, TensorType, Type};

    #[test]
    fn test_element_type_parse() {
        #[derive(Debug)]
        struct Case {
            text: &'static str,
            expected: Option<ElementType>,
        }

        let cases = [
            Case {
                text: "f32",
                expected: Some(ElementType::F32),
            },
            Case {
                text: "si64",
                expected: Some(ElementType::SInt(64)),
            },
            Case {
                text: "ui4",
                expected: Some(ElementType::UInt(4)),
            },
            Case {
                text: "i1",
                expected: Some(ElementType::Bool),
            },
            Case {
                text: "complex<f64>",
                expected: Some(ElementType::Complex128),
            },
            Case {
                text: "si7",
                expected: None,
            },
            Case {
                text: "int32",
                expected: None,
            },
        ];

        cases.test_each(|case| {
            let parsed = case.text.parse::<ElementType>().ok();
            assert_eq!(parsed, case.expected);
            if let Some(elem) = parsed {
                assert_eq!(elem.to_string(), case.text);
            }
        })
    }

    #[test]
    fn test_type_display() {
        #[derive(Debug)]
        struct Case {
            ty: Type,
            expected: &'static str,
        }

        let tensor = TensorType::new(ElementType::F32, [Dim::Fixed(2), Dim::Dynamic]);
        let cases = [
            Case {
                ty: Type::Tensor(tensor.clone()),
                expected: "!torch.vtensor<[2,?],f32>",
            },
            Case {
                ty: Type::tensor(ElementType::SInt(64), [0i64; 0]),
                expected: "!torch.vtensor<[],si64>",
            },
            Case {
                ty: Type::Tensor(TensorType::unranked(ElementType::Bool)),
                expected: "!torch.vtensor<*,i1>",
            },
            Case {
                ty: Type::List(Box::new(Type::Tensor(tensor.clone()))),
                expected: "!torch.list<vtensor<[2,?],f32>>",
            },
            Case {
                ty: Type::Optional(Box::new(Type::List(Box::new(Type::Tensor(tensor))))),
                expected: "!torch.optional<list<vtensor<[2,?],f32>>>",
            },
            Case {
                ty: Type::None,
                expected: "!torch.none",
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.ty.to_string(), case.expected);
        })
    }
}
