use std::error::Error;
use std::fmt::{Display, Formatter};

use onnx_import_ir::VerifyError;

/// Identifies the graph node that an [`ImportError`] relates to.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeContext {
    /// Position of the node in its graph's node list.
    pub index: usize,
    pub op_type: String,
    pub domain: String,
    /// Node name, if the node has one.
    pub name: Option<String>,
}

/// Categories of error when importing a model.
///
/// See [`ImportError::kind`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ImportErrorKind {
    /// A required attribute was not present on a node.
    MissingAttribute { name: String },

    /// An attribute exists but has a different kind than expected.
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// A node has more than one attribute with the same name.
    DuplicateAttribute { name: String },

    /// A node input refers to a value that has not been defined.
    UndefinedValue { name: String },

    /// A value name was defined more than once.
    DuplicateBinding { name: String },

    /// No converter is registered for an operator at any opset version.
    UnknownOperator { op_type: String, domain: String },

    /// Converters are registered for an operator, but none for the
    /// requested opset version.
    UnsupportedOperator {
        op_type: String,
        domain: String,
        opset_version: i64,
    },

    /// A declared graph output is never produced.
    UndefinedGraphOutput { name: String },

    /// A converter rejected the node.
    ConversionFailed { message: String },

    /// The model structure is invalid or uses unsupported features outside
    /// of operator nodes.
    InvalidModel { message: String },

    /// The assembled module failed verification.
    VerificationFailed { message: String },
}

impl Display for ImportErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAttribute { name } => write!(f, "required attribute \"{}\" missing", name),
            Self::TypeMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "attribute \"{}\" has type {}, expected {}",
                name, actual, expected
            ),
            Self::DuplicateAttribute { name } => write!(f, "duplicate attribute \"{}\"", name),
            Self::UndefinedValue { name } => write!(f, "value \"{}\" is not defined", name),
            Self::DuplicateBinding { name } => write!(f, "value \"{}\" is already defined", name),
            Self::UnknownOperator { op_type, domain } => {
                write!(f, "unknown operator \"{}\" in domain \"{}\"", op_type, domain)
            }
            Self::UnsupportedOperator {
                op_type,
                domain,
                opset_version,
            } => write!(
                f,
                "operator \"{}\" in domain \"{}\" is not supported at opset version {}",
                op_type, domain, opset_version
            ),
            Self::UndefinedGraphOutput { name } => {
                write!(f, "graph output \"{}\" is not produced by any node", name)
            }
            Self::ConversionFailed { message } => write!(f, "{}", message),
            Self::InvalidModel { message } => write!(f, "invalid model: {}", message),
            Self::VerificationFailed { message } => write!(f, "verification failed: {}", message),
        }
    }
}

/// Errors that occur when importing a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportError {
    kind: ImportErrorKind,
    node: Option<NodeContext>,
}

impl ImportError {
    pub fn new(kind: ImportErrorKind) -> Self {
        Self { kind, node: None }
    }

    /// Attach the node that this error relates to, unless a node is already
    /// set.
    ///
    /// Errors from nested subgraphs keep the innermost node.
    pub(crate) fn with_node(mut self, node: impl FnOnce() -> NodeContext) -> Self {
        if self.node.is_none() {
            self.node = Some(node());
        }
        self
    }

    /// Return the category of error.
    pub fn kind(&self) -> &ImportErrorKind {
        &self.kind
    }

    /// The graph node that this error relates to.
    ///
    /// This is `None` for errors that are not about a specific node.
    pub fn node(&self) -> Option<&NodeContext> {
        self.node.as_ref()
    }

    pub(crate) fn missing_attribute(name: &str) -> Self {
        Self::new(ImportErrorKind::MissingAttribute {
            name: name.to_string(),
        })
    }

    pub(crate) fn conversion_failed(message: impl Into<String>) -> Self {
        Self::new(ImportErrorKind::ConversionFailed {
            message: message.into(),
        })
    }

    pub(crate) fn invalid_model(message: impl Into<String>) -> Self {
        Self::new(ImportErrorKind::InvalidModel {
            message: message.into(),
        })
    }
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(node) = &self.node {
            write!(
                f,
                "node {} ({}, domain \"{}\"",
                node.index, node.op_type, node.domain
            )?;
            if let Some(name) = &node.name {
                write!(f, ", name \"{}\"", name)?;
            }
            write!(f, "): {}", self.kind)
        } else {
            self.kind.fmt(f)
        }
    }
}

impl Error for ImportError {}

impl From<ImportErrorKind> for ImportError {
    fn from(kind: ImportErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<VerifyError> for ImportError {
    fn from(err: VerifyError) -> Self {
        Self::new(ImportErrorKind::VerificationFailed {
            message: err.message().to_string(),
        })
    }
}

/// Create an [`ImportError`] for a converter failure using a format string.
macro_rules! conversion_error {
    ($format_str:literal, $($arg:tt)*) => {{
        $crate::error::ImportError::conversion_failed(format!($format_str, $($arg)*))
    }};

    ($message:expr) => {{
        $crate::error::ImportError::conversion_failed($message)
    }};
}

pub(crate) use conversion_error;

#[cfg(test)]
mod tests {
    use onnx_import_testing::TestCases;

    use super::{ImportError, ImportErrorKind, NodeContext};

    #[test]
    fn test_display() {
        #[derive(Debug)]
        struct Case {
            error: ImportError,
            expected: &'static str,
        }

        let node = |name: Option<&str>| NodeContext {
            index: 3,
            op_type: "Concat".into(),
            domain: String::new(),
            name: name.map(|n| n.to_string()),
        };

        let cases = [
            Case {
                error: ImportError::missing_attribute("axis").with_node(|| node(None)),
                expected: "node 3 (Concat, domain \"\"): required attribute \"axis\" missing",
            },
            Case {
                error: ImportError::missing_attribute("axis").with_node(|| node(Some("concat_1"))),
                expected: "node 3 (Concat, domain \"\", name \"concat_1\"): required attribute \"axis\" missing",
            },
            Case {
                error: ImportErrorKind::UndefinedGraphOutput { name: "z".into() }.into(),
                expected: "graph output \"z\" is not produced by any node",
            },
            Case {
                error: ImportErrorKind::UnsupportedOperator {
                    op_type: "Softmax".into(),
                    domain: String::new(),
                    opset_version: 0,
                }
                .into(),
                expected: "operator \"Softmax\" in domain \"\" is not supported at opset version 0",
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.error.to_string(), case.expected);
        })
    }

    #[test]
    fn test_with_node_keeps_innermost() {
        let inner = NodeContext {
            index: 0,
            op_type: "Relu".into(),
            domain: String::new(),
            name: None,
        };
        let outer = NodeContext {
            index: 5,
            op_type: "If".into(),
            domain: String::new(),
            name: None,
        };
        let err = conversion_error!("bad")
            .with_node(|| inner.clone())
            .with_node(|| outer.clone());
        assert_eq!(err.node(), Some(&inner));
    }
}
