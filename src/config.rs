use std::collections::BTreeMap;

use onnx_import_ir::{Dim, ElementType, TensorType, Type};

use crate::error::ImportError;

/// Replacement type for a graph input or output.
///
/// Fields which are `None` keep the corresponding part of the declared type.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct TypeOverride {
    /// Element type using the IR spelling, eg. `f32` or `si64`.
    pub dtype: Option<String>,

    /// Dimension sizes. `None` entries are dynamic.
    pub shape: Option<Vec<Option<i64>>>,
}

impl TypeOverride {
    /// Apply the override to the declared type of value `name`.
    pub(crate) fn apply(&self, name: &str, declared: Option<&Type>) -> Result<Type, ImportError> {
        let declared = declared.and_then(|t| t.as_tensor());
        let elem = match (&self.dtype, declared) {
            (Some(dtype), _) => dtype.parse::<ElementType>().map_err(|err| {
                ImportError::invalid_model(format!("type override for \"{}\": {}", name, err))
            })?,
            (None, Some(tt)) => tt.elem,
            (None, None) => {
                return Err(ImportError::invalid_model(format!(
                    "type override for \"{}\" needs a dtype because the declared type is not a tensor",
                    name
                )));
            }
        };
        let dims = match (&self.shape, declared) {
            (Some(shape), _) => Some(shape.iter().map(|&d| Dim::from(d)).collect()),
            (None, Some(tt)) => tt.dims.clone(),
            (None, None) => None,
        };
        Ok(Type::Tensor(TensorType { dims, elem }))
    }
}

/// Options which customize how a model is imported.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct ImportOptions {
    pub(crate) opset_version: Option<i64>,
    pub(crate) input_overrides: BTreeMap<String, TypeOverride>,
    pub(crate) output_overrides: BTreeMap<String, TypeOverride>,
    pub(crate) domain_allowlist: Option<Vec<String>>,
    pub(crate) elide_initialized_inputs: bool,
    pub(crate) function_name: Option<String>,
    pub(crate) shadowable_names: Vec<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            opset_version: None,
            input_overrides: BTreeMap::new(),
            output_overrides: BTreeMap::new(),
            domain_allowlist: None,
            elide_initialized_inputs: true,
            function_name: None,
            shadowable_names: Vec::new(),
        }
    }
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the opset version of the default ONNX domain. By default the
    /// version declared by the model is used.
    pub fn opset_version(&mut self, version: Option<i64>) -> &mut Self {
        self.opset_version = version;
        self
    }

    /// Replace the declared type of a graph input.
    pub fn input_override(&mut self, name: &str, ty: TypeOverride) -> &mut Self {
        self.input_overrides.insert(name.to_string(), ty);
        self
    }

    /// Replace the declared type of a graph output.
    pub fn output_override(&mut self, name: &str, ty: TypeOverride) -> &mut Self {
        self.output_overrides.insert(name.to_string(), ty);
        self
    }

    /// Restrict the operator domains which may be imported.
    ///
    /// Nodes in other domains fail with
    /// [`UnknownOperator`](crate::ImportErrorKind::UnknownOperator). The
    /// default domain may be given as `""` or `"ai.onnx"`.
    pub fn domain_allowlist(&mut self, domains: Option<Vec<String>>) -> &mut Self {
        self.domain_allowlist = domains;
        self
    }

    /// Add a domain to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) -> &mut Self {
        self.domain_allowlist
            .get_or_insert_with(Vec::new)
            .push(domain.to_string());
        self
    }

    /// Set whether graph inputs that have an initializer are removed from the
    /// function parameters.
    ///
    /// This is enabled by default. Old exporters declared every weight as an
    /// input with an initializer. When disabled, such models fail to import.
    pub fn elide_initialized_inputs(&mut self, enable: bool) -> &mut Self {
        self.elide_initialized_inputs = enable;
        self
    }

    /// Set the name of the imported function. Defaults to the graph name.
    pub fn function_name(&mut self, name: Option<String>) -> &mut Self {
        self.function_name = name;
        self
    }

    /// Allow nodes in the main graph to redefine the value `name`.
    ///
    /// By default, a node output whose name is already bound fails with
    /// [`DuplicateBinding`](crate::ImportErrorKind::DuplicateBinding). Later
    /// nodes see the most recent definition.
    pub fn allow_shadowing(&mut self, name: &str) -> &mut Self {
        self.shadowable_names.push(name.to_string());
        self
    }

    pub(crate) fn domain_allowed(&self, domain: &str) -> bool {
        match &self.domain_allowlist {
            Some(domains) => domains
                .iter()
                .any(|d| crate::op_registry::normalize_domain(d) == domain),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use onnx_import_ir::{Dim, ElementType, TensorType, Type};

    use super::{ImportOptions, TypeOverride};

    #[test]
    fn test_type_override() {
        let declared = Type::tensor(ElementType::F32, [Dim::Dynamic, Dim::Fixed(3)]);

        let shape_only = TypeOverride {
            dtype: None,
            shape: Some(vec![Some(1), Some(3)]),
        };
        assert_eq!(
            shape_only.apply("x", Some(&declared)).unwrap(),
            Type::tensor(ElementType::F32, [1i64, 3])
        );

        let dtype_only = TypeOverride {
            dtype: Some("f16".into()),
            shape: None,
        };
        assert_eq!(
            dtype_only.apply("x", Some(&declared)).unwrap(),
            Type::tensor(ElementType::F16, [Dim::Dynamic, Dim::Fixed(3)])
        );
        assert_eq!(
            dtype_only.apply("x", None).unwrap(),
            Type::Tensor(TensorType::unranked(ElementType::F16))
        );

        let invalid = TypeOverride {
            dtype: Some("float".into()),
            shape: None,
        };
        assert_eq!(
            invalid.apply("x", Some(&declared)).err().unwrap().to_string(),
            "invalid model: type override for \"x\": unknown element type \"float\""
        );

        assert!(TypeOverride::default().apply("x", None).is_err());
    }

    #[test]
    fn test_domain_allowlist() {
        let mut opts = ImportOptions::new();
        assert!(opts.domain_allowed("com.microsoft"));

        opts.allow_domain("ai.onnx");
        assert!(opts.domain_allowed(""));
        assert!(!opts.domain_allowed("com.microsoft"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_options() {
        let json = r#"{
            "opset_version": 17,
            "input_overrides": {"x": {"shape": [1, null, 224, 224]}},
            "domain_allowlist": [""],
            "elide_initialized_inputs": false
        }"#;
        let opts: ImportOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.opset_version, Some(17));
        assert_eq!(
            opts.input_overrides["x"].shape,
            Some(vec![Some(1), None, Some(224), Some(224)])
        );
        assert!(!opts.elide_initialized_inputs);
        assert_eq!(opts.function_name, None);

        let err = serde_json::from_str::<ImportOptions>(r#"{"opset": 17}"#);
        assert!(err.is_err());
    }
}
