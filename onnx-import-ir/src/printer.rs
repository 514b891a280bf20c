//! Textual form of modules.
//!
//! The output follows the MLIR assembly format used by the `torch` dialect,
//! eg.
//!
//! ```text
//! module {
//!   func.func @main(%0: !torch.vtensor<[2,3],f32>) -> !torch.vtensor<[2,3],f32> {
//!     %1 = torch.operator "onnx.Relu"(%0) : (!torch.vtensor<[2,3],f32>) -> !torch.vtensor<[2,3],f32> loc("relu")
//!     return %1 : !torch.vtensor<[2,3],f32> loc(unknown)
//!   } loc("graph:main")
//! }
//! ```

use std::fmt;
use std::fmt::{Display, Write};

use rustc_hash::FxHashMap;

use crate::attr::fmt_attr_key;
use crate::op::{Block, Function, Location, Module, Operation};
use crate::types::Type;
use crate::value_id::ValueId;
use crate::verify::FUNC_RETURN;

struct Printer<'a, 'f> {
    out: &'a mut fmt::Formatter<'f>,
    types: FxHashMap<ValueId, &'a Type>,
    indent: usize,
}

/// Write a comma-separated list.
fn join<T: Display>(out: &mut impl Write, items: impl IntoIterator<Item = T>) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            write!(out, ", ")?;
        }
        write!(out, "{}", item)?;
    }
    Ok(())
}

struct Symbol<'a>(&'a str);

impl Display for Symbol<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bare = self
            .0
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
        if bare {
            write!(f, "@{}", self.0)
        } else {
            write!(f, "@{:?}", self.0)
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Unknown => write!(f, "loc(unknown)"),
            Location::Name(name) => write!(f, "loc({:?})", name),
        }
    }
}

impl<'a, 'f> Printer<'a, 'f> {
    fn new(out: &'a mut fmt::Formatter<'f>) -> Self {
        Printer {
            out,
            types: FxHashMap::default(),
            indent: 0,
        }
    }

    fn write_indent(&mut self) -> fmt::Result {
        for _ in 0..self.indent {
            write!(self.out, "  ")?;
        }
        Ok(())
    }

    fn write_type_of(&mut self, id: ValueId) -> fmt::Result {
        match self.types.get(&id) {
            Some(ty) => write!(self.out, "{}", ty),
            None => write!(self.out, "<<unknown>>"),
        }
    }

    fn write_result_types(&mut self, types: &[&Type]) -> fmt::Result {
        match types {
            [ty] => write!(self.out, "{}", ty),
            _ => {
                write!(self.out, "(")?;
                join(&mut *self.out, types)?;
                write!(self.out, ")")
            }
        }
    }

    fn print_module(&mut self, module: &'a Module) -> fmt::Result {
        writeln!(self.out, "module {{")?;
        self.indent += 1;
        for func in module.functions() {
            self.print_function(func)?;
        }
        self.indent -= 1;
        writeln!(self.out, "}}")
    }

    fn print_function(&mut self, func: &'a Function) -> fmt::Result {
        self.write_indent()?;
        write!(self.out, "func.func {}(", Symbol(func.name()))?;
        for (i, arg) in func.args().iter().enumerate() {
            if i > 0 {
                write!(self.out, ", ")?;
            }
            write!(self.out, "{}: {}", arg.id, arg.ty)?;
            self.types.insert(arg.id, &arg.ty);
        }
        write!(self.out, ")")?;

        if !func.result_types().is_empty() {
            write!(self.out, " -> ")?;
            let types: Vec<&Type> = func.result_types().iter().collect();
            self.write_result_types(&types)?;
        }

        if !func.attributes().is_empty() {
            write!(self.out, " attributes ")?;
            self.print_attr_dict(func.attributes().iter().map(|(k, v)| (k.as_str(), v)))?;
        }
        writeln!(self.out, " {{")?;

        self.indent += 1;
        self.print_block_ops(func.body())?;
        self.indent -= 1;

        self.write_indent()?;
        writeln!(self.out, "}} {}", func.location())
    }

    fn print_attr_dict<'x>(
        &mut self,
        attrs: impl Iterator<Item = (&'x str, &'x crate::Attribute)>,
    ) -> fmt::Result {
        write!(self.out, "{{")?;
        for (i, (key, val)) in attrs.enumerate() {
            if i > 0 {
                write!(self.out, ", ")?;
            }
            fmt_attr_key(self.out, key)?;
            write!(self.out, " = {}", val)?;
        }
        write!(self.out, "}}")
    }

    fn print_block_ops(&mut self, block: &'a Block) -> fmt::Result {
        for op in block.literals().iter().chain(block.ops()) {
            self.print_op(op)?;
        }
        self.print_terminator(block.terminator())
    }

    fn print_terminator(&mut self, op: &'a Operation) -> fmt::Result {
        self.write_indent()?;
        let name = if op.name() == FUNC_RETURN {
            "return"
        } else {
            op.name()
        };
        write!(self.out, "{}", name)?;
        if !op.operands().is_empty() {
            write!(self.out, " ")?;
            join(&mut *self.out, op.operands())?;
            write!(self.out, " : ")?;
            for (i, &id) in op.operands().iter().enumerate() {
                if i > 0 {
                    write!(self.out, ", ")?;
                }
                self.write_type_of(id)?;
            }
        }
        writeln!(self.out, " {}", op.location())
    }

    fn print_op(&mut self, op: &'a Operation) -> fmt::Result {
        self.write_indent()?;
        if !op.results().is_empty() {
            join(&mut *self.out, op.results().iter().map(|r| r.id))?;
            write!(self.out, " = ")?;
        }

        // The `name` attribute of `torch.operator` is printed inline.
        let op_name = op.attr("name").and_then(|n| n.as_str());
        write!(self.out, "{}", op.name())?;
        if let Some(op_name) = op_name {
            write!(self.out, " {:?}", op_name)?;
        }

        write!(self.out, "(")?;
        join(&mut *self.out, op.operands())?;
        write!(self.out, ")")?;

        let mut attrs = op
            .attributes()
            .iter()
            .filter(|(key, _)| op_name.is_none() || key != "name")
            .map(|(k, v)| (k.as_str(), v))
            .peekable();
        if attrs.peek().is_some() {
            write!(self.out, " ")?;
            self.print_attr_dict(attrs)?;
        }

        write!(self.out, " : (")?;
        for (i, &id) in op.operands().iter().enumerate() {
            if i > 0 {
                write!(self.out, ", ")?;
            }
            self.write_type_of(id)?;
        }
        write!(self.out, ") -> ")?;
        let result_types: Vec<&Type> = op.results().iter().map(|r| &r.ty).collect();
        self.write_result_types(&result_types)?;

        for (i, region) in op.regions().iter().enumerate() {
            write!(self.out, "{}", if i == 0 { " " } else { ", " })?;
            writeln!(self.out, "{{")?;
            for block in region.blocks() {
                self.indent += 1;
                self.write_indent()?;
                write!(self.out, "^bb0(")?;
                for (i, arg) in block.args().iter().enumerate() {
                    if i > 0 {
                        write!(self.out, ", ")?;
                    }
                    write!(self.out, "{}: {}", arg.id, arg.ty)?;
                    self.types.insert(arg.id, &arg.ty);
                }
                writeln!(self.out, "):")?;
                self.indent += 1;
                self.print_block_ops(block)?;
                self.indent -= 2;
            }
            self.write_indent()?;
            write!(self.out, "}}")?;
        }

        writeln!(self.out, " {}", op.location())?;

        for result in op.results() {
            self.types.insert(result.id, &result.ty);
        }
        Ok(())
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer::new(f).print_module(self)
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer::new(f).print_function(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::attr::Attribute;
    use crate::op::{Block, Function, Location, Module, Operation, Region, Value};
    use crate::types::{ElementType, Type};
    use crate::value_id::ValueIdGen;
    use crate::verify::{FUNC_RETURN, OPERATOR_TERMINATOR};

    #[test]
    fn test_print_module() {
        let ids = ValueIdGen::new();
        let x = ids.next_id();
        let y = ids.next_id();
        let ty = Type::tensor(ElementType::F32, [2i64, 3]);

        let relu = Operation::build("torch.operator")
            .attr("name", "onnx.LeakyRelu")
            .attr("torch.onnx.alpha", Attribute::Float(0.5))
            .operand(x)
            .result(y, ty.clone())
            .location(Location::name("relu"))
            .finish();
        let body = Block::new(
            vec![Value::new(x, ty.clone())],
            Vec::new(),
            vec![relu],
            Operation::build(FUNC_RETURN).operand(y).finish(),
        );
        let func = Function::new(
            "main",
            vec![ty],
            vec![("torch.onnx_meta.ir_version".into(), Attribute::Int(8))],
            body,
            Location::name("graph:main"),
        );
        let module = Module::new(vec![func]);

        let expected = r#"module {
  func.func @main(%0: !torch.vtensor<[2,3],f32>) -> !torch.vtensor<[2,3],f32> attributes {torch.onnx_meta.ir_version = 8 : si64} {
    %1 = torch.operator "onnx.LeakyRelu"(%0) {torch.onnx.alpha = 0.5 : f32} : (!torch.vtensor<[2,3],f32>) -> !torch.vtensor<[2,3],f32> loc("relu")
    return %1 : !torch.vtensor<[2,3],f32> loc(unknown)
  } loc("graph:main")
}
"#;
        assert_eq!(module.to_string(), expected);
    }

    #[test]
    fn test_print_regions() {
        let ids = ValueIdGen::new();
        let cond = ids.next_id();
        let then_val = ids.next_id();
        let out = ids.next_id();
        let cond_ty = Type::tensor(ElementType::Bool, [0i64; 0]);
        let ty = Type::tensor(ElementType::F32, [1i64]);

        let then_block = Block::new(
            Vec::new(),
            vec![Operation::build("torch.operator")
                .attr("name", "onnx.Constant")
                .result(then_val, ty.clone())
                .finish()],
            Vec::new(),
            Operation::build(OPERATOR_TERMINATOR)
                .operand(then_val)
                .finish(),
        );
        let if_op = Operation::build("torch.operator")
            .attr("name", "onnx.If")
            .operand(cond)
            .result(out, ty.clone())
            .region(Region::from(then_block))
            .location(Location::name("if"))
            .finish();
        let body = Block::new(
            vec![Value::new(cond, cond_ty)],
            Vec::new(),
            vec![if_op],
            Operation::build(FUNC_RETURN).operand(out).finish(),
        );
        let func = Function::new("g", vec![ty], Vec::new(), body, Location::Unknown);

        let expected = r#"func.func @g(%0: !torch.vtensor<[],i1>) -> !torch.vtensor<[1],f32> {
  %2 = torch.operator "onnx.If"(%0) : (!torch.vtensor<[],i1>) -> !torch.vtensor<[1],f32> {
    ^bb0():
      %1 = torch.operator "onnx.Constant"() : () -> !torch.vtensor<[1],f32> loc(unknown)
      torch.operator_terminator %1 : !torch.vtensor<[1],f32> loc(unknown)
  } loc("if")
  return %2 : !torch.vtensor<[1],f32> loc(unknown)
} loc(unknown)
"#;
        assert_eq!(func.to_string(), expected);
    }

    #[test]
    fn test_print_quoted_symbol() {
        let body = Block::new(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Operation::build(FUNC_RETURN).finish(),
        );
        let func = Function::new(
            "torch-jit-export",
            Vec::new(),
            Vec::new(),
            body,
            Location::Unknown,
        );
        assert_eq!(
            func.to_string(),
            "func.func @\"torch-jit-export\"() {\n  return loc(unknown)\n} loc(unknown)\n"
        );
    }
}
