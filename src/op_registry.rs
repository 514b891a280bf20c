use log::{debug, warn};
use onnx_import_ir::{Attribute, Location, Operation, Region, Type, Value, ValueId};
use onnx_import_proto::onnx;
use rustc_hash::FxHashMap;

use crate::attrs::AttributeDict;
use crate::error::{ImportError, ImportErrorKind};

pub(crate) mod converters;
mod shape_rules;

pub use shape_rules::{ShapeInputs, ShapeRule};

/// Name of the operation which converted ONNX nodes are emitted as.
pub const TORCH_OPERATOR: &str = "torch.operator";

/// Return the canonical form of an operator domain.
///
/// `"ai.onnx"` is an alias for the default domain, which is the empty string.
pub fn normalize_domain(domain: &str) -> &str {
    match domain {
        "ai.onnx" => "",
        _ => domain,
    }
}

/// Output of a converter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvertedNode {
    /// Operations to add to the current block, in order.
    pub ops: Vec<Operation>,

    /// Values to bind to the node's outputs. There must be one per output.
    pub results: Vec<Value>,
}

pub type ConvertResult = Result<ConvertedNode, ImportError>;

/// Function which converts an ONNX node into IR operations.
pub type ConvertFunction = dyn Fn(&mut ConvertContext) -> ConvertResult + Send + Sync;

/// A converter registered for an operator at a given since-version.
struct VersionedConverter {
    since_version: i64,
    convert: Box<ConvertFunction>,
}

/// Converter selected by [`OpRegistry::resolve`].
pub struct ResolvedOp<'r> {
    /// Version of the operator's definition which the converter implements.
    pub since_version: i64,
    convert: &'r ConvertFunction,
}

impl ResolvedOp<'_> {
    pub fn convert(&self, ctx: &mut ConvertContext) -> ConvertResult {
        (self.convert)(ctx)
    }
}

/// Registry of operator converters and shape rules.
///
/// Converters are keyed by operator type, domain and the opset version in
/// which the operator definition they implement was introduced. A registry is
/// populated before importing and then shared read-only by imports.
///
/// New registries have no operators registered by default. To create a
/// registry with all built-in operators pre-registered, use
/// [`OpRegistry::with_all_ops`].
#[derive(Default)]
pub struct OpRegistry {
    /// Map of domain => operator type => converters sorted by since-version.
    ops: FxHashMap<String, FxHashMap<String, Vec<VersionedConverter>>>,

    /// Map of domain => operator type => shape rule.
    rules: FxHashMap<String, FxHashMap<String, ShapeRule>>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converter for an operator.
    ///
    /// `since_version` is the first opset version of `domain` for which the
    /// converter should be used. Registering a converter for a version that
    /// already has one replaces it.
    pub fn register<F>(&mut self, op_type: &str, domain: &str, since_version: i64, convert: F)
    where
        F: Fn(&mut ConvertContext) -> ConvertResult + Send + Sync + 'static,
    {
        let entries = self
            .ops
            .entry(normalize_domain(domain).to_string())
            .or_default()
            .entry(op_type.to_string())
            .or_default();
        let entry = VersionedConverter {
            since_version,
            convert: Box::new(convert),
        };
        match entries.binary_search_by_key(&since_version, |e| e.since_version) {
            Ok(index) => entries[index] = entry,
            Err(index) => entries.insert(index, entry),
        }
    }

    /// Register the shape rule used to infer the type of an operator's first
    /// output.
    pub fn register_rule(&mut self, op_type: &str, domain: &str, rule: ShapeRule) {
        self.rules
            .entry(normalize_domain(domain).to_string())
            .or_default()
            .insert(op_type.to_string(), rule);
    }

    /// Return the shape rule registered for an operator.
    pub fn shape_rule(&self, op_type: &str, domain: &str) -> Option<&ShapeRule> {
        self.rules.get(normalize_domain(domain))?.get(op_type)
    }

    /// Return true if any converter is registered for an operator.
    pub fn contains(&self, op_type: &str, domain: &str) -> bool {
        self.versions(op_type, domain).is_some()
    }

    fn versions(&self, op_type: &str, domain: &str) -> Option<&[VersionedConverter]> {
        self.ops
            .get(normalize_domain(domain))?
            .get(op_type)
            .map(|v| v.as_slice())
    }

    /// Find the converter for an operator at a given opset version.
    ///
    /// This selects the converter with the greatest since-version that does
    /// not exceed `opset_version`. Fails with
    /// [`UnknownOperator`](ImportErrorKind::UnknownOperator) if there are no
    /// converters for the operator at any version, or
    /// [`UnsupportedOperator`](ImportErrorKind::UnsupportedOperator) if
    /// there are converters only for later versions.
    pub fn resolve(
        &self,
        op_type: &str,
        domain: &str,
        opset_version: i64,
    ) -> Result<ResolvedOp<'_>, ImportError> {
        let domain = normalize_domain(domain);
        let Some(versions) = self.versions(op_type, domain) else {
            return Err(ImportError::new(ImportErrorKind::UnknownOperator {
                op_type: op_type.to_string(),
                domain: domain.to_string(),
            }));
        };

        let entry = versions
            .iter()
            .rev()
            .find(|entry| entry.since_version <= opset_version)
            .ok_or_else(|| {
                ImportError::new(ImportErrorKind::UnsupportedOperator {
                    op_type: op_type.to_string(),
                    domain: domain.to_string(),
                    opset_version,
                })
            })?;

        debug!(
            "resolved {} (domain \"{}\") at opset {} to since-version {}",
            op_type, domain, opset_version, entry.since_version
        );

        Ok(ResolvedOp {
            since_version: entry.since_version,
            convert: entry.convert.as_ref(),
        })
    }

    /// Create a new registry with converters and shape rules for all
    /// built-in operators.
    pub fn with_all_ops() -> Self {
        use ShapeRule::*;

        let mut reg = OpRegistry::new();

        macro_rules! register_op {
            (@convert) => {
                converters::generic
            };

            (@convert $convert:expr) => {
                $convert
            };

            ($op:literal, [$($since:literal),+] $(, convert = $convert:expr)? $(, rule = $rule:expr)?) => {{
                for since in [$($since),+] {
                    reg.register($op, "", since, register_op!(@convert $($convert)?));
                }
                $(reg.register_rule($op, "", $rule);)?
            }};
        }

        register_op!("Abs", [1, 6, 13], rule = SameAsInput(0));
        register_op!("Acos", [7], rule = SameAsInput(0));
        register_op!("Acosh", [9], rule = SameAsInput(0));
        register_op!("Add", [1, 6, 7, 13, 14], rule = Broadcast);
        register_op!("And", [1, 7], rule = BroadcastBool);
        register_op!("ArgMax", [1, 11, 12, 13]);
        register_op!("ArgMin", [1, 11, 12, 13]);
        register_op!("Asin", [7], rule = SameAsInput(0));
        register_op!("Asinh", [9], rule = SameAsInput(0));
        register_op!("Atan", [7], rule = SameAsInput(0));
        register_op!("Atanh", [9], rule = SameAsInput(0));
        register_op!("AveragePool", [1, 7, 10, 11, 19], rule = SameRankAs(0));
        register_op!("BatchNormalization", [1, 6, 7, 9, 14, 15], rule = SameAsInput(0));
        register_op!("Bernoulli", [15]);
        register_op!("BitShift", [11], rule = Broadcast);
        register_op!("BitwiseAnd", [18], rule = Broadcast);
        register_op!("BitwiseNot", [18], rule = SameAsInput(0));
        register_op!("BitwiseOr", [18], rule = Broadcast);
        register_op!("BitwiseXor", [18], rule = Broadcast);
        register_op!("BlackmanWindow", [17]);
        register_op!("Cast", [1, 6, 9, 13, 19, 21], convert = converters::cast, rule = CastTo);
        register_op!("CastLike", [15, 19, 21]);
        register_op!("Ceil", [1, 6, 13], rule = SameAsInput(0));
        register_op!("Celu", [12], rule = SameAsInput(0));
        register_op!("Clip", [1, 6, 11, 12, 13], rule = SameAsInput(0));
        register_op!("Compress", [9, 11]);
        register_op!("Concat", [1, 4, 11, 13], convert = converters::concat, rule = Concat);
        register_op!("ConcatFromSequence", [11]);
        register_op!("Constant", [1, 9, 11, 12, 13, 19, 21], convert = converters::constant);
        register_op!("ConstantOfShape", [9, 20, 21]);
        register_op!("Conv", [1, 11], rule = SameRankAs(0));
        register_op!("ConvInteger", [10]);
        register_op!("ConvTranspose", [1, 11], rule = SameRankAs(0));
        register_op!("Cos", [7], rule = SameAsInput(0));
        register_op!("Cosh", [9], rule = SameAsInput(0));
        register_op!("CumSum", [11, 14], rule = SameAsInput(0));
        register_op!("DepthToSpace", [1, 11, 13], rule = SameRankAs(0));
        register_op!("DequantizeLinear", [10, 13, 19, 21]);
        register_op!("Det", [11]);
        register_op!("Div", [1, 6, 7, 13, 14], rule = Broadcast);
        register_op!("Dropout", [1, 6, 7, 10, 12, 13], rule = SameAsInput(0));
        register_op!("DynamicQuantizeLinear", [11]);
        register_op!("Einsum", [12]);
        register_op!("Elu", [1, 6], rule = SameAsInput(0));
        register_op!("Equal", [1, 7, 11, 13, 19], rule = BroadcastBool);
        register_op!("Erf", [9, 13], rule = SameAsInput(0));
        register_op!("Exp", [1, 6, 13], rule = SameAsInput(0));
        register_op!("Expand", [8, 13]);
        register_op!("EyeLike", [9]);
        register_op!("Flatten", [1, 9, 11, 13, 21], rule = Flatten);
        register_op!("Floor", [1, 6, 13], rule = SameAsInput(0));
        register_op!("GRU", [1, 3, 7, 14]);
        register_op!("Gather", [1, 11, 13]);
        register_op!("GatherElements", [11, 13]);
        register_op!("GatherND", [11, 12, 13]);
        register_op!("Gelu", [20], rule = SameAsInput(0));
        register_op!("Gemm", [1, 6, 7, 9, 11, 13], rule = Gemm);
        register_op!("GlobalAveragePool", [1], rule = SameRankAs(0));
        register_op!("GlobalMaxPool", [1], rule = SameRankAs(0));
        register_op!("Greater", [1, 7, 9, 13], rule = BroadcastBool);
        register_op!("GreaterOrEqual", [12, 16], rule = BroadcastBool);
        register_op!("GridSample", [16, 20]);
        register_op!("GroupNormalization", [18, 21], rule = SameAsInput(0));
        register_op!("HammingWindow", [17]);
        register_op!("HannWindow", [17]);
        register_op!("HardSigmoid", [1, 6], rule = SameAsInput(0));
        register_op!("HardSwish", [14], rule = SameAsInput(0));
        register_op!("Hardmax", [1, 11, 13], convert = converters::softmax, rule = SameAsInput(0));
        register_op!("Identity", [1, 13, 14, 16, 19, 21], rule = SameAsInput(0));
        register_op!("If", [1, 11, 13, 16, 19, 21]);
        register_op!("InstanceNormalization", [1, 6], rule = SameAsInput(0));
        register_op!("IsInf", [10, 20]);
        register_op!("IsNaN", [9, 13, 20]);
        register_op!("LRN", [1, 13], rule = SameAsInput(0));
        register_op!("LSTM", [1, 7, 14]);
        register_op!("LayerNormalization", [17], rule = SameAsInput(0));
        register_op!("LeakyRelu", [1, 6, 16], rule = SameAsInput(0));
        register_op!("Less", [1, 7, 9, 13], rule = BroadcastBool);
        register_op!("LessOrEqual", [12, 16], rule = BroadcastBool);
        register_op!("Log", [1, 6, 13], rule = SameAsInput(0));
        register_op!(
            "LogSoftmax",
            [1, 11, 13],
            convert = converters::softmax,
            rule = SameAsInput(0)
        );
        register_op!("Loop", [1, 11, 13, 16, 19, 21]);
        register_op!("LpNormalization", [1], rule = SameAsInput(0));
        register_op!("MatMul", [1, 9, 13], rule = MatMul);
        register_op!("MatMulInteger", [10]);
        register_op!("Max", [1, 6, 8, 12, 13], rule = Broadcast);
        register_op!("MaxPool", [1, 8, 10, 11, 12], rule = SameRankAs(0));
        register_op!("Mean", [1, 6, 8, 13], rule = Broadcast);
        register_op!("MeanVarianceNormalization", [9, 13], rule = SameAsInput(0));
        register_op!("Min", [1, 6, 8, 12, 13], rule = Broadcast);
        register_op!("Mish", [18], rule = SameAsInput(0));
        register_op!("Mod", [10, 13], rule = Broadcast);
        register_op!("Mul", [1, 6, 7, 13, 14], rule = Broadcast);
        register_op!("Neg", [1, 6, 13], rule = SameAsInput(0));
        register_op!("NonMaxSuppression", [10, 11]);
        register_op!("NonZero", [9, 13]);
        register_op!("Not", [1], rule = SameAsInput(0));
        register_op!("OneHot", [9, 11]);
        register_op!("Optional", [15]);
        register_op!("OptionalGetElement", [15, 18]);
        register_op!("OptionalHasElement", [15, 18]);
        register_op!("Or", [1, 7], rule = BroadcastBool);
        register_op!("PRelu", [1, 6, 7, 9, 16], rule = Broadcast);
        register_op!("Pad", [1, 2, 11, 13, 18, 19, 21], rule = SameRankAs(0));
        register_op!("Pow", [1, 7, 12, 13, 15], rule = Broadcast);
        register_op!("QLinearConv", [10]);
        register_op!("QLinearMatMul", [10, 21]);
        register_op!("QuantizeLinear", [10, 13, 19, 21]);
        register_op!("RNN", [1, 7, 14]);
        register_op!("RandomNormal", [1]);
        register_op!("RandomNormalLike", [1]);
        register_op!("RandomUniform", [1]);
        register_op!("RandomUniformLike", [1]);
        register_op!("Range", [11]);
        register_op!("Reciprocal", [1, 6, 13], rule = SameAsInput(0));
        register_op!("ReduceL1", [1, 11, 13, 18], convert = converters::reduce(18), rule = Reduce);
        register_op!("ReduceL2", [1, 11, 13, 18], convert = converters::reduce(18), rule = Reduce);
        register_op!(
            "ReduceLogSum",
            [1, 11, 13, 18],
            convert = converters::reduce(18),
            rule = Reduce
        );
        register_op!(
            "ReduceLogSumExp",
            [1, 11, 13, 18],
            convert = converters::reduce(18),
            rule = Reduce
        );
        register_op!(
            "ReduceMax",
            [1, 11, 12, 13, 18, 20],
            convert = converters::reduce(18),
            rule = Reduce
        );
        register_op!(
            "ReduceMean",
            [1, 11, 13, 18],
            convert = converters::reduce(18),
            rule = Reduce
        );
        register_op!(
            "ReduceMin",
            [1, 11, 12, 13, 18, 20],
            convert = converters::reduce(18),
            rule = Reduce
        );
        register_op!(
            "ReduceProd",
            [1, 11, 13, 18],
            convert = converters::reduce(18),
            rule = Reduce
        );
        register_op!("ReduceSum", [1, 11, 13], convert = converters::reduce(13), rule = Reduce);
        register_op!(
            "ReduceSumSquare",
            [1, 11, 13, 18],
            convert = converters::reduce(18),
            rule = Reduce
        );
        register_op!("Relu", [1, 6, 13, 14], rule = SameAsInput(0));
        register_op!("Reshape", [1, 5, 13, 14, 19, 21]);
        register_op!("Resize", [10, 11, 13, 18, 19], rule = SameRankAs(0));
        register_op!("ReverseSequence", [10], rule = SameAsInput(0));
        register_op!("RoiAlign", [10, 16]);
        register_op!("Round", [11], rule = SameAsInput(0));
        register_op!("STFT", [17]);
        register_op!("Scan", [8, 9, 11, 16, 19, 21]);
        register_op!("ScatterElements", [11, 13, 16, 18], rule = SameAsInput(0));
        register_op!("ScatterND", [11, 13, 16, 18], rule = SameAsInput(0));
        register_op!("Selu", [1, 6], rule = SameAsInput(0));
        register_op!("SequenceAt", [11]);
        register_op!("SequenceConstruct", [11]);
        register_op!("SequenceEmpty", [11]);
        register_op!("SequenceErase", [11]);
        register_op!("SequenceInsert", [11]);
        register_op!("SequenceLength", [11]);
        register_op!("Shape", [1, 13, 15, 19, 21], rule = Shape);
        register_op!("Shrink", [9], rule = SameAsInput(0));
        register_op!("Sigmoid", [1, 6, 13], rule = SameAsInput(0));
        register_op!("Sign", [9, 13], rule = SameAsInput(0));
        register_op!("Sin", [7], rule = SameAsInput(0));
        register_op!("Sinh", [9], rule = SameAsInput(0));
        register_op!("Size", [1, 13, 19, 21]);
        register_op!("Slice", [1, 10, 11, 13], rule = SameRankAs(0));
        register_op!("Softmax", [1, 11, 13], convert = converters::softmax, rule = SameAsInput(0));
        register_op!("Softplus", [1], rule = SameAsInput(0));
        register_op!("Softsign", [1], rule = SameAsInput(0));
        register_op!("SpaceToDepth", [1, 13], rule = SameRankAs(0));
        register_op!(
            "Split",
            [1, 2, 11, 13, 18],
            convert = converters::split,
            rule = SameRankAs(0)
        );
        register_op!("SplitToSequence", [11]);
        register_op!("Sqrt", [1, 6, 13], rule = SameAsInput(0));
        register_op!("Squeeze", [1, 11, 13, 21], convert = converters::squeeze, rule = Squeeze);
        register_op!("Sub", [1, 6, 7, 13, 14], rule = Broadcast);
        register_op!("Sum", [1, 6, 8, 13], rule = Broadcast);
        register_op!("Tan", [7], rule = SameAsInput(0));
        register_op!("Tanh", [1, 6, 13], rule = SameAsInput(0));
        register_op!("ThresholdedRelu", [10], rule = SameAsInput(0));
        register_op!("Tile", [1, 6, 13], rule = SameRankAs(0));
        register_op!("TopK", [1, 10, 11], rule = SameRankAs(0));
        register_op!("Transpose", [1, 13, 21], rule = Transpose);
        register_op!("Trilu", [14], rule = SameAsInput(0));
        register_op!("Unique", [11]);
        register_op!(
            "Unsqueeze",
            [1, 11, 13, 21],
            convert = converters::unsqueeze,
            rule = Unsqueeze
        );
        register_op!("Where", [9, 16], rule = Broadcast);
        register_op!("Xor", [1, 7], rule = BroadcastBool);

        reg
    }
}

/// Operand of a node being converted.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Value bound to the input name.
    Value(Value),
    /// The input name was empty, indicating an omitted optional input.
    Absent,
}

impl Operand {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Operand::Value(val) => Some(val),
            Operand::Absent => None,
        }
    }
}

/// Scope in which a node is converted.
///
/// This provides converters with access to state owned by the graph being
/// imported. Changes made through the scope are discarded if conversion
/// fails.
pub trait ConvertScope {
    /// Allocate a new value ID.
    fn next_id(&mut self) -> ValueId;

    /// Return the value representing an absent operand.
    fn none_value(&mut self) -> ValueId;

    /// Return the value of a named integer constant.
    fn constant(&self, name: &str) -> Option<&[i64]>;

    /// Record the value of a named integer constant produced by the node.
    fn record_constant(&mut self, name: &str, values: Vec<i64>);

    /// Import a graph attribute as a region.
    fn import_subgraph(&mut self, graph: &onnx::GraphProto) -> Result<Region, ImportError>;
}

/// Context passed to converters.
pub struct ConvertContext<'a> {
    node: &'a onnx::NodeProto,
    attrs: &'a AttributeDict<'a>,
    operands: &'a [Operand],
    output_hints: &'a [Option<Type>],
    shape_rule: Option<&'a ShapeRule>,
    opset_version: i64,
    since_version: i64,
    location: Location,
    scope: &'a mut dyn ConvertScope,
}

impl<'a> ConvertContext<'a> {
    pub(crate) fn new(
        node: &'a onnx::NodeProto,
        attrs: &'a AttributeDict<'a>,
        operands: &'a [Operand],
        output_hints: &'a [Option<Type>],
        shape_rule: Option<&'a ShapeRule>,
        opset_version: i64,
        since_version: i64,
        location: Location,
        scope: &'a mut dyn ConvertScope,
    ) -> Self {
        ConvertContext {
            node,
            attrs,
            operands,
            output_hints,
            shape_rule,
            opset_version,
            since_version,
            location,
            scope,
        }
    }

    pub fn node(&self) -> &'a onnx::NodeProto {
        self.node
    }

    pub fn op_type(&self) -> &'a str {
        self.node.op_type.as_deref().unwrap_or_default()
    }

    pub fn attrs(&self) -> &'a AttributeDict<'a> {
        self.attrs
    }

    /// Opset version of the node's domain which the model was imported with.
    pub fn opset_version(&self) -> i64 {
        self.opset_version
    }

    /// Since-version of the converter handling the node.
    pub fn since_version(&self) -> i64 {
        self.since_version
    }

    pub fn operands(&self) -> &'a [Operand] {
        self.operands
    }

    /// Return true if the node has a non-absent input at `index`.
    pub fn has_input(&self, index: usize) -> bool {
        self.operands
            .get(index)
            .is_some_and(|op| op.value().is_some())
    }

    pub fn input_type(&self, index: usize) -> Option<&'a Type> {
        self.operands
            .get(index)
            .and_then(|op| op.value())
            .map(|val| &val.ty)
    }

    /// Return the value of the input at `index` if it is an integer constant.
    pub fn constant_input(&self, index: usize) -> Option<&[i64]> {
        let name = self.node.input.get(index)?;
        if name.is_empty() {
            return None;
        }
        self.scope.constant(name)
    }

    pub fn num_outputs(&self) -> usize {
        self.node.output.len()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Return the declared type of an output, if known.
    pub fn output_hint(&self, index: usize) -> Option<&'a Type> {
        self.output_hints.get(index).and_then(|hint| hint.as_ref())
    }

    /// Determine the types of the node's outputs.
    ///
    /// Declared types take precedence, then the operator's shape rule for the
    /// first output. The shape rule is not run if the first output has a
    /// declared type. Outputs whose types are unknown get the none type.
    pub fn result_types(&self) -> Result<Vec<Type>, ImportError> {
        self.result_types_or(|_| None)
    }

    /// Variant of [`result_types`](Self::result_types) which uses `fallback`
    /// for outputs whose types are not otherwise known.
    pub fn result_types_or(
        &self,
        fallback: impl Fn(usize) -> Option<Type>,
    ) -> Result<Vec<Type>, ImportError> {
        let mut inferred = match self.shape_rule {
            Some(rule) if self.output_hint(0).is_none() => {
                let inputs = ShapeInputs {
                    types: (0..self.operands.len())
                        .map(|i| self.input_type(i))
                        .collect(),
                    constants: (0..self.operands.len())
                        .map(|i| self.constant_input(i))
                        .collect(),
                    attrs: self.attrs,
                    since_version: self.since_version,
                };
                rule.infer(&inputs)?
            }
            _ => None,
        };

        let types = self
            .node
            .output
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let rule_type = if i == 0 { inferred.take() } else { None };
                self.output_hint(i)
                    .cloned()
                    .or(rule_type)
                    .or_else(|| fallback(i))
                    .unwrap_or_else(|| {
                        if !name.is_empty() {
                            warn!(
                                "type of value \"{}\" produced by {} is unknown, using none type",
                                name,
                                self.op_type()
                            );
                        }
                        Type::None
                    })
            })
            .collect();
        Ok(types)
    }

    /// Create a value with a new ID.
    pub fn new_value(&mut self, ty: Type) -> Value {
        Value::new(self.scope.next_id(), ty)
    }

    /// Return IDs of the node's operands, with absent operands replaced by
    /// the none value.
    pub fn operand_ids(&mut self) -> Vec<ValueId> {
        let operands = self.operands;
        operands
            .iter()
            .map(|op| match op {
                Operand::Value(val) => val.id,
                Operand::Absent => self.scope.none_value(),
            })
            .collect()
    }

    /// Import the node's graph attributes as regions, ordered by attribute
    /// name.
    pub fn import_regions(&mut self) -> Result<Vec<Region>, ImportError> {
        self.attrs
            .graphs()
            .into_iter()
            .map(|(_name, graph)| self.scope.import_subgraph(graph))
            .collect()
    }

    /// Record the value of an output as an integer constant.
    pub fn record_constant(&mut self, output: usize, values: Vec<i64>) {
        if let Some(name) = self.node.output.get(output) {
            if !name.is_empty() {
                self.scope.record_constant(name, values);
            }
        }
    }

    /// Emit the node as a `torch.operator` op with result types from
    /// [`result_types`](Self::result_types).
    ///
    /// `defaults` supplies values for attributes the node omits.
    pub fn emit_operator(&mut self, defaults: &[(&str, Attribute)]) -> ConvertResult {
        let result_types = self.result_types()?;
        self.emit_operator_with_types(defaults, result_types)
    }

    /// Emit the node as a `torch.operator` op with the given result types.
    pub fn emit_operator_with_types(
        &mut self,
        defaults: &[(&str, Attribute)],
        result_types: Vec<Type>,
    ) -> ConvertResult {
        let mut op = Operation::build(TORCH_OPERATOR)
            .attr("name", format!("onnx.{}", self.op_type()));

        for (name, value) in self.attrs.iter() {
            let Some(attr) = value.to_ir().map_err(|err| {
                let message = match err.kind() {
                    ImportErrorKind::ConversionFailed { message } => {
                        Some(format!("attribute \"{}\": {}", name, message))
                    }
                    _ => None,
                };
                message.map(ImportError::conversion_failed).unwrap_or(err)
            })?
            else {
                // Graph attributes are imported as regions.
                continue;
            };
            op = op.attr(format!("torch.onnx.{}", name), attr);
        }
        for (name, default) in defaults {
            if !self.attrs.contains(name) {
                op = op.attr(format!("torch.onnx.{}", name), default.clone());
            }
        }

        let operands = self.operand_ids();
        for region in self.import_regions()? {
            op = op.region(region);
        }
        let results: Vec<Value> = result_types
            .into_iter()
            .map(|ty| self.new_value(ty))
            .collect();

        let op = op
            .operands(operands)
            .results(results.iter().cloned())
            .location(self.location.clone())
            .finish();

        Ok(ConvertedNode {
            ops: vec![op],
            results,
        })
    }
}
