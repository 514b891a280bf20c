//! Operator attribute dictionary.

use std::borrow::Cow;
use std::fmt;

use log::warn;
use onnx_import_ir::Attribute;
use onnx_import_proto::onnx;
use rustc_hash::FxHashMap;

use crate::error::{ImportError, ImportErrorKind};
use crate::types::dense_from_tensor;

/// Kind of an ONNX attribute (the `AttributeProto.type` field).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttrKind {
    Undefined,
    Float,
    Int,
    String,
    Tensor,
    Graph,
    Floats,
    Ints,
    Strings,
    Tensors,
    Graphs,
    SparseTensor,
    SparseTensors,
    TypeProto,
    TypeProtos,
}

impl AttrKind {
    fn from_proto(attr_type: onnx::AttributeType) -> Option<Self> {
        type T = onnx::AttributeType;

        let kind = match attr_type {
            T::UNDEFINED => Self::Undefined,
            T::FLOAT => Self::Float,
            T::INT => Self::Int,
            T::STRING => Self::String,
            T::TENSOR => Self::Tensor,
            T::GRAPH => Self::Graph,
            T::FLOATS => Self::Floats,
            T::INTS => Self::Ints,
            T::STRINGS => Self::Strings,
            T::TENSORS => Self::Tensors,
            T::GRAPHS => Self::Graphs,
            T::SPARSE_TENSOR => Self::SparseTensor,
            T::SPARSE_TENSORS => Self::SparseTensors,
            T::TYPE_PROTO => Self::TypeProto,
            T::TYPE_PROTOS => Self::TypeProtos,
            _ => return None,
        };
        Some(kind)
    }

    /// Determine the kind of an attribute which has no `type` field, as
    /// written by some old exporters, from the fields that are set.
    fn infer(attr: &onnx::AttributeProto) -> Self {
        if attr.f.is_some() {
            Self::Float
        } else if attr.i.is_some() {
            Self::Int
        } else if attr.s.is_some() {
            Self::String
        } else if attr.t.is_some() {
            Self::Tensor
        } else if attr.g.is_some() {
            Self::Graph
        } else if !attr.floats.is_empty() {
            Self::Floats
        } else if !attr.ints.is_empty() {
            Self::Ints
        } else if !attr.strings.is_empty() {
            Self::Strings
        } else if !attr.tensors.is_empty() {
            Self::Tensors
        } else if !attr.graphs.is_empty() {
            Self::Graphs
        } else {
            Self::Undefined
        }
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "UNDEFINED",
            Self::Float => "FLOAT",
            Self::Int => "INT",
            Self::String => "STRING",
            Self::Tensor => "TENSOR",
            Self::Graph => "GRAPH",
            Self::Floats => "FLOATS",
            Self::Ints => "INTS",
            Self::Strings => "STRINGS",
            Self::Tensors => "TENSORS",
            Self::Graphs => "GRAPHS",
            Self::SparseTensor => "SPARSE_TENSOR",
            Self::SparseTensors => "SPARSE_TENSORS",
            Self::TypeProto => "TYPE_PROTO",
            Self::TypeProtos => "TYPE_PROTOS",
        };
        write!(f, "{}", name)
    }
}

/// Value of an ONNX attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue<'a> {
    Float(f32),
    Int(i64),
    String(Cow<'a, str>),
    Tensor(&'a onnx::TensorProto),
    Graph(&'a onnx::GraphProto),
    Floats(&'a [f32]),
    Ints(&'a [i64]),
    Strings(Vec<Cow<'a, str>>),
    Tensors(&'a [onnx::TensorProto]),

    /// An attribute of a kind that cannot be represented in the IR.
    Unsupported(AttrKind),
}

impl<'a> AttrValue<'a> {
    fn from_proto(attr: &'a onnx::AttributeProto) -> Self {
        let kind = match attr.r#type {
            Some(code) => AttrKind::from_proto(onnx::AttributeType(code)),
            None => Some(AttrKind::infer(attr)),
        };
        let Some(kind) = kind else {
            return AttrValue::Unsupported(AttrKind::Undefined);
        };

        let string = |s: &'a [u8]| String::from_utf8_lossy(s);
        match kind {
            AttrKind::Float => AttrValue::Float(attr.f.unwrap_or_default()),
            AttrKind::Int => AttrValue::Int(attr.i.unwrap_or_default()),
            AttrKind::String => AttrValue::String(string(attr.s.as_deref().unwrap_or_default())),
            AttrKind::Tensor => match &attr.t {
                Some(t) => AttrValue::Tensor(t),
                None => AttrValue::Unsupported(AttrKind::Tensor),
            },
            AttrKind::Graph => match &attr.g {
                Some(g) => AttrValue::Graph(g),
                None => AttrValue::Unsupported(AttrKind::Graph),
            },
            AttrKind::Floats => AttrValue::Floats(&attr.floats),
            AttrKind::Ints => AttrValue::Ints(&attr.ints),
            AttrKind::Strings => {
                AttrValue::Strings(attr.strings.iter().map(|s| string(s)).collect())
            }
            AttrKind::Tensors => AttrValue::Tensors(&attr.tensors),
            kind => AttrValue::Unsupported(kind),
        }
    }

    pub fn kind(&self) -> AttrKind {
        match self {
            Self::Float(_) => AttrKind::Float,
            Self::Int(_) => AttrKind::Int,
            Self::String(_) => AttrKind::String,
            Self::Tensor(_) => AttrKind::Tensor,
            Self::Graph(_) => AttrKind::Graph,
            Self::Floats(_) => AttrKind::Floats,
            Self::Ints(_) => AttrKind::Ints,
            Self::Strings(_) => AttrKind::Strings,
            Self::Tensors(_) => AttrKind::Tensors,
            Self::Unsupported(kind) => *kind,
        }
    }

    /// Convert this value to an IR attribute.
    ///
    /// Returns `None` for graph attributes, which are imported as regions
    /// rather than attributes.
    pub fn to_ir(&self) -> Result<Option<Attribute>, ImportError> {
        let attr = match self {
            Self::Float(x) => Attribute::Float(*x),
            Self::Int(x) => Attribute::Int(*x),
            Self::String(s) => Attribute::String(s.to_string()),
            Self::Tensor(t) => Attribute::Dense(
                dense_from_tensor(t).map_err(ImportError::conversion_failed)?,
            ),
            Self::Graph(_) => return Ok(None),
            Self::Floats(xs) => Attribute::Array(xs.iter().map(|x| Attribute::Float(*x)).collect()),
            Self::Ints(xs) => Attribute::Array(xs.iter().map(|x| Attribute::Int(*x)).collect()),
            Self::Strings(xs) => {
                Attribute::Array(xs.iter().map(|s| Attribute::String(s.to_string())).collect())
            }
            Self::Tensors(ts) => Attribute::Array(
                ts.iter()
                    .map(|t| dense_from_tensor(t).map(Attribute::Dense))
                    .collect::<Result<_, _>>()
                    .map_err(ImportError::conversion_failed)?,
            ),
            Self::Unsupported(kind) => {
                return Err(ImportError::conversion_failed(format!(
                    "attribute type {} is not supported for generic operators",
                    kind
                )));
            }
        };
        Ok(Some(attr))
    }
}

fn type_mismatch(name: &str, expected: AttrKind, actual: &AttrValue) -> ImportError {
    ImportErrorKind::TypeMismatch {
        name: name.to_string(),
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
    .into()
}

/// Attributes of a node, keyed by name.
///
/// Entries keep the order in which they appear in the node, while lookup is
/// done through a hash index.
#[derive(Clone, Debug, Default)]
pub struct AttributeDict<'a> {
    entries: Vec<(&'a str, AttrValue<'a>)>,
    index: FxHashMap<&'a str, usize>,
}

impl<'a> AttributeDict<'a> {
    /// Build a dictionary from a node's attribute list.
    ///
    /// Fails with [`ImportErrorKind::DuplicateAttribute`] if a name appears
    /// more than once.
    pub fn from_proto(attrs: &'a [onnx::AttributeProto]) -> Result<Self, ImportError> {
        let mut dict = AttributeDict {
            entries: Vec::with_capacity(attrs.len()),
            index: FxHashMap::default(),
        };
        for attr in attrs {
            dict.insert(
                attr.name.as_deref().unwrap_or_default(),
                AttrValue::from_proto(attr),
            )?;
        }
        Ok(dict)
    }

    /// Add an entry, failing if `name` is already present.
    pub fn insert(&mut self, name: &'a str, value: AttrValue<'a>) -> Result<(), ImportError> {
        if self.index.contains_key(name) {
            return Err(ImportErrorKind::DuplicateAttribute {
                name: name.to_string(),
            }
            .into());
        }
        self.index.insert(name, self.entries.len());
        self.entries.push((name, value));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &AttrValue<'a>)> {
        self.entries.iter().map(|(name, val)| (*name, val))
    }

    /// Look up an attribute without checking its kind.
    pub fn find(&self, name: &str) -> Option<&AttrValue<'a>> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    /// Get a required attribute of any kind.
    pub fn require(&self, name: &str) -> Result<&AttrValue<'a>, ImportError> {
        self.find(name)
            .ok_or_else(|| ImportError::missing_attribute(name))
    }

    /// Get a required attribute of a given kind.
    pub fn get(&self, name: &str, kind: AttrKind) -> Result<&AttrValue<'a>, ImportError> {
        let value = self.require(name)?;
        if value.kind() != kind {
            return Err(type_mismatch(name, kind, value));
        }
        Ok(value)
    }

    /// Get an optional attribute of a given kind, returning `default` if it
    /// is absent or has a different kind.
    pub fn get_or_default(
        &self,
        name: &str,
        kind: AttrKind,
        default: AttrValue<'a>,
    ) -> AttrValue<'a> {
        match self.find(name) {
            Some(value) if value.kind() == kind => value.clone(),
            Some(value) => {
                warn!(
                    "Ignoring attribute \"{}\" of type {} (expected {})",
                    name,
                    value.kind(),
                    kind
                );
                default
            }
            None => default,
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, ImportError> {
        match self.require(name)? {
            AttrValue::Int(x) => Ok(*x),
            other => Err(type_mismatch(name, AttrKind::Int, other)),
        }
    }

    pub fn int_or(&self, name: &str, default: i64) -> i64 {
        match self.get_or_default(name, AttrKind::Int, AttrValue::Int(default)) {
            AttrValue::Int(x) => x,
            _ => default,
        }
    }

    pub fn float_or(&self, name: &str, default: f32) -> f32 {
        match self.get_or_default(name, AttrKind::Float, AttrValue::Float(default)) {
            AttrValue::Float(x) => x,
            _ => default,
        }
    }

    pub fn string(&self, name: &str) -> Result<&str, ImportError> {
        match self.require(name)? {
            AttrValue::String(s) => Ok(s),
            other => Err(type_mismatch(name, AttrKind::String, other)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<&'a [i64], ImportError> {
        match self.require(name)? {
            AttrValue::Ints(xs) => Ok(*xs),
            other => Err(type_mismatch(name, AttrKind::Ints, other)),
        }
    }

    /// Get an optional ints attribute.
    pub fn ints_opt(&self, name: &str) -> Result<Option<&'a [i64]>, ImportError> {
        if !self.contains(name) {
            return Ok(None);
        }
        self.ints(name).map(Some)
    }

    pub fn tensor(&self, name: &str) -> Result<&'a onnx::TensorProto, ImportError> {
        match self.require(name)? {
            AttrValue::Tensor(t) => Ok(*t),
            other => Err(type_mismatch(name, AttrKind::Tensor, other)),
        }
    }

    /// Return the graph-valued attributes, sorted by name.
    pub fn graphs(&self) -> Vec<(&'a str, &'a onnx::GraphProto)> {
        let mut graphs: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(name, val)| match val {
                AttrValue::Graph(g) => Some((*name, *g)),
                _ => None,
            })
            .collect();
        graphs.sort_by_key(|(name, _)| *name);
        graphs
    }
}

#[cfg(test)]
mod tests {
    use onnx_import_proto::onnx;
    use onnx_import_testing::onnx::{create_attr, create_graph, AttrValue as TestAttr};
    use onnx_import_testing::TestCases;

    use super::{AttrKind, AttrValue, AttributeDict};
    use crate::error::ImportErrorKind;
    use onnx_import_ir::Attribute;

    #[test]
    fn test_lookup_preserves_order() {
        let attrs = [
            create_attr("b", TestAttr::Int(1)),
            create_attr("a", TestAttr::Float(0.5)),
            create_attr("c", TestAttr::String("x".into())),
        ];
        let dict = AttributeDict::from_proto(&attrs).unwrap();

        let names: Vec<_> = dict.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "a", "c"]);
        assert_eq!(dict.int("b").unwrap(), 1);
        assert_eq!(dict.float_or("a", 0.), 0.5);
        assert_eq!(dict.string("c").unwrap(), "x");
    }

    #[test]
    fn test_duplicate_attribute() {
        let attrs = [
            create_attr("axis", TestAttr::Int(1)),
            create_attr("axis", TestAttr::Int(2)),
        ];
        let err = AttributeDict::from_proto(&attrs).err().unwrap();
        assert_eq!(
            err.kind(),
            &ImportErrorKind::DuplicateAttribute {
                name: "axis".into()
            }
        );
    }

    #[test]
    fn test_get_errors() {
        #[derive(Debug)]
        struct Case {
            name: &'static str,
            kind: AttrKind,
            expected: ImportErrorKind,
        }

        let cases = [
            Case {
                name: "axis",
                kind: AttrKind::Int,
                expected: ImportErrorKind::MissingAttribute {
                    name: "axis".into(),
                },
            },
            Case {
                name: "perm",
                kind: AttrKind::Int,
                expected: ImportErrorKind::TypeMismatch {
                    name: "perm".into(),
                    expected: "INT".into(),
                    actual: "INTS".into(),
                },
            },
        ];

        cases.test_each(|case| {
            let attrs = [create_attr("perm", TestAttr::Ints(vec![1, 0]))];
            let dict = AttributeDict::from_proto(&attrs).unwrap();
            let err = dict.get(case.name, case.kind).err().unwrap();
            assert_eq!(err.kind(), &case.expected);
        })
    }

    #[test]
    fn test_get_or_default() {
        let attrs = [create_attr("alpha", TestAttr::Ints(vec![1]))];
        let dict = AttributeDict::from_proto(&attrs).unwrap();

        // Missing and mismatched attributes both fall back to the default.
        assert_eq!(dict.int_or("beta", 3), 3);
        assert_eq!(
            dict.get_or_default("alpha", AttrKind::Float, AttrValue::Float(0.2)),
            AttrValue::Float(0.2)
        );
    }

    #[test]
    fn test_infer_kind_without_type_field() {
        let attrs = [onnx::AttributeProto {
            name: Some("axis".into()),
            i: Some(0),
            ..Default::default()
        }];
        let dict = AttributeDict::from_proto(&attrs).unwrap();
        assert_eq!(dict.int("axis").unwrap(), 0);
    }

    #[test]
    fn test_to_ir() {
        #[derive(Debug)]
        struct Case {
            attr: onnx::AttributeProto,
            expected: Result<Option<Attribute>, String>,
        }

        let cases = [
            Case {
                attr: create_attr("i", TestAttr::Int(4)),
                expected: Ok(Some(Attribute::Int(4))),
            },
            Case {
                attr: create_attr("fs", TestAttr::Floats(vec![1.0, 2.0])),
                expected: Ok(Some(Attribute::Array(vec![
                    Attribute::Float(1.0),
                    Attribute::Float(2.0),
                ]))),
            },
            Case {
                attr: create_attr("then_branch", TestAttr::Graph(create_graph("then"))),
                expected: Ok(None),
            },
            Case {
                attr: onnx::AttributeProto {
                    name: Some("sparse".into()),
                    r#type: Some(onnx::AttributeType::SPARSE_TENSOR.0),
                    ..Default::default()
                },
                expected: Err(
                    "attribute type SPARSE_TENSOR is not supported for generic operators".into(),
                ),
            },
        ];

        cases.test_each(|case| {
            let attrs = std::slice::from_ref(&case.attr);
            let dict = AttributeDict::from_proto(attrs).unwrap();
            let (_, value) = dict.iter().next().unwrap();
            let result = value.to_ir().map_err(|e| e.to_string());
            assert_eq!(result, case.expected);
        })
    }
}
