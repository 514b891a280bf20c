use std::error::Error;
use std::fs;
use std::io::Write;
use std::process::ExitCode;

use log::{info, LevelFilter};
use onnx_import::{import_model, ImportError, ImportErrorKind, ImportOptions, OpRegistry};
use onnx_import_ir::Module;
use onnx_import_proto::onnx::ModelProto;
use onnx_import_proto::Message;

mod logger;

/// Format of the imported module.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Emit {
    /// MLIR-style assembly.
    Text,
    /// JSON serialization of the IR.
    Json,
}

struct Args {
    /// Model file to import.
    model: String,

    /// Output path. Defaults to stdout.
    output: Option<String>,

    emit: Emit,

    /// Path of a JSON file containing [`ImportOptions`].
    config: Option<String>,

    opset: Option<i64>,
    function_name: Option<String>,
    allow_domains: Vec<String>,
    no_elide_inputs: bool,

    /// Load the model using a memory-mapped file.
    mmap: bool,

    log_level: LevelFilter,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut model = None;
    let mut output = None;
    let mut emit = Emit::Text;
    let mut config = None;
    let mut opset = None;
    let mut function_name = None;
    let mut allow_domains = Vec::new();
    let mut no_elide_inputs = false;
    let mut mmap = false;
    let mut log_level = LevelFilter::Warn;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Value(val) if model.is_none() => model = Some(val.string()?),
            Short('o') | Long("output") => output = Some(parser.value()?.string()?),
            Long("emit") => {
                emit = match parser.value()?.string()?.as_str() {
                    "text" => Emit::Text,
                    "json" => Emit::Json,
                    other => {
                        return Err(format!("unknown emit format \"{}\"", other).into());
                    }
                }
            }
            Long("config") => config = Some(parser.value()?.string()?),
            Long("opset") => opset = Some(parser.value()?.parse()?),
            Long("function-name") => function_name = Some(parser.value()?.string()?),
            Long("allow-domain") => allow_domains.push(parser.value()?.string()?),
            Long("no-elide-inputs") => no_elide_inputs = true,
            Long("mmap") => mmap = true,
            Short('v') | Long("verbose") => log_level = LevelFilter::Debug,
            Short('q') | Long("quiet") => log_level = LevelFilter::Error,
            Short('h') | Long("help") => {
                println!(
                    "Import an ONNX model into torch-dialect IR.

Usage: {bin_name} [OPTIONS] <model>

Options:

  -o, --output <path>       Write output to <path> instead of stdout
  --emit <text|json>        Output format. Defaults to text.
  --opset <version>         Override the opset version of the default domain
  --config <path>           Read import options from a JSON file
  --function-name <name>    Name of the imported function
  --allow-domain <domain>   Allow operators from <domain>. Can be repeated.
                            If not set, all domains are allowed.
  --no-elide-inputs         Keep graph inputs which have initializers
  --mmap                    Load the model using a memory-mapped file
  -v, --verbose             Enable debug logging
  -q, --quiet               Only log errors
  -h, --help                Print help

Exit status is 0 on success, 2 if the model uses an unknown operator, 3 if
an operator is not supported at the model's opset version and 1 for other
errors.
",
                    bin_name = parser.bin_name().unwrap_or("onnx-import")
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let model = model.ok_or("missing `<model>` arg")?;

    Ok(Args {
        model,
        output,
        emit,
        config,
        opset,
        function_name,
        allow_domains,
        no_elide_inputs,
        mmap,
        log_level,
    })
}

/// Build import options from the config file and command-line flags.
///
/// Flags take precedence over the config file.
fn import_options(args: &Args) -> Result<ImportOptions, Box<dyn Error>> {
    let mut options = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|err| format!("failed to read config \"{}\": {}", path, err))?;
            serde_json::from_str(&json)
                .map_err(|err| format!("invalid config \"{}\": {}", path, err))?
        }
        None => ImportOptions::default(),
    };

    if args.opset.is_some() {
        options.opset_version(args.opset);
    }
    if args.function_name.is_some() {
        options.function_name(args.function_name.clone());
    }
    for domain in &args.allow_domains {
        options.allow_domain(domain);
    }
    if args.no_elide_inputs {
        options.elide_initialized_inputs(false);
    }

    Ok(options)
}

fn read_model(path: &str, mmap: bool) -> Result<ModelProto, Box<dyn Error>> {
    if mmap {
        return read_model_mmap(path);
    }
    let buf = fs::read(path)?;
    Ok(ModelProto::decode(buf.as_slice())?)
}

#[cfg(feature = "mmap")]
fn read_model_mmap(path: &str) -> Result<ModelProto, Box<dyn Error>> {
    let file = fs::File::open(path)?;
    // Safety: The file must not be modified while it is mapped.
    let buf = unsafe { memmap2::Mmap::map(&file)? };
    Ok(ModelProto::decode(&buf[..])?)
}

#[cfg(not(feature = "mmap"))]
fn read_model_mmap(_path: &str) -> Result<ModelProto, Box<dyn Error>> {
    Err("--mmap requires the `mmap` feature".into())
}

fn format_module(module: &Module, emit: Emit) -> Result<String, Box<dyn Error>> {
    match emit {
        Emit::Text => Ok(module.to_string()),
        Emit::Json => Ok(serde_json::to_string_pretty(module)? + "\n"),
    }
}

fn write_output(path: Option<&str>, content: &str) -> Result<(), Box<dyn Error>> {
    match path {
        Some(path) => fs::write(path, content)?,
        None => std::io::stdout().lock().write_all(content.as_bytes())?,
    }
    Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let options = import_options(args)?;
    let model = read_model(&args.model, args.mmap)?;
    let module = import_model(&model, &OpRegistry::with_all_ops(), &options)?;
    let output = format_module(&module, args.emit)?;
    write_output(args.output.as_deref(), &output)?;

    if let Some(path) = &args.output {
        info!("wrote {}", path);
    }

    Ok(())
}

/// Map an import failure to the process exit status.
fn exit_code(err: &(dyn Error + 'static)) -> u8 {
    match err.downcast_ref::<ImportError>().map(|err| err.kind()) {
        Some(ImportErrorKind::UnknownOperator { .. }) => 2,
        Some(ImportErrorKind::UnsupportedOperator { .. }) => 3,
        _ => 1,
    }
}

/// Import an ONNX model and write the module as MLIR-style text or JSON.
///
/// ```text
/// onnx-import model.onnx -o model.mlir
/// ```
fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(1);
        }
    };

    if let Err(err) = logger::init_log(args.log_level) {
        eprintln!("error: failed to initialize logging: {}", err);
        return ExitCode::from(1);
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(exit_code(err.as_ref()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use log::LevelFilter;
    use onnx_import::{import_model, ImportError, ImportErrorKind, ImportOptions, OpRegistry};
    use onnx_import_proto::onnx::ModelProto;
    use onnx_import_proto::Message;
    use onnx_import_testing::onnx::{
        create_graph, create_model, create_node, f32_value_info, GraphProtoExt, NodeProtoExt,
    };
    use onnx_import_testing::TestCases;

    use super::{exit_code, format_module, import_options, Args, Emit};

    fn args() -> Args {
        Args {
            model: "model.onnx".into(),
            output: None,
            emit: Emit::Text,
            config: None,
            opset: None,
            function_name: None,
            allow_domains: Vec::new(),
            no_elide_inputs: false,
            mmap: false,
            log_level: LevelFilter::Warn,
        }
    }

    #[test]
    fn test_exit_code() {
        #[derive(Debug)]
        struct Case {
            kind: ImportErrorKind,
            expected: u8,
        }

        let cases = [
            Case {
                kind: ImportErrorKind::UnknownOperator {
                    op_type: "Foo".into(),
                    domain: "".into(),
                },
                expected: 2,
            },
            Case {
                kind: ImportErrorKind::UnsupportedOperator {
                    op_type: "Relu".into(),
                    domain: "".into(),
                    opset_version: 0,
                },
                expected: 3,
            },
            Case {
                kind: ImportErrorKind::UndefinedValue { name: "x".into() },
                expected: 1,
            },
        ];

        cases.test_each(|case| {
            let err: Box<dyn Error> = Box::new(ImportError::new(case.kind.clone()));
            assert_eq!(exit_code(err.as_ref()), case.expected);
        });

        let err: Box<dyn Error> = "bad config".into();
        assert_eq!(exit_code(err.as_ref()), 1);
    }

    #[test]
    fn test_import_options_from_flags() {
        let mut args = args();
        args.opset = Some(17);
        args.function_name = Some("forward".into());
        args.allow_domains = vec!["ai.onnx".into(), "com.microsoft".into()];
        args.no_elide_inputs = true;

        let options = import_options(&args).unwrap();

        let mut expected = ImportOptions::new();
        expected
            .opset_version(Some(17))
            .function_name(Some("forward".into()))
            .allow_domain("ai.onnx")
            .allow_domain("com.microsoft")
            .elide_initialized_inputs(false);
        assert_eq!(options, expected);
    }

    #[test]
    fn test_import_options_missing_config() {
        let mut args = args();
        args.config = Some("does-not-exist.json".into());
        let err = import_options(&args).err().unwrap();
        assert!(err.to_string().starts_with("failed to read config"));
    }

    #[test]
    fn test_format_module() {
        let graph = create_graph("main")
            .with_input(f32_value_info("x", &[2]))
            .with_node(create_node("Neg").with_input("x").with_output("y"))
            .with_output(f32_value_info("y", &[2]));
        let bytes = create_model(graph, 13).encode_to_vec();

        let model = ModelProto::decode(bytes.as_slice()).unwrap();
        let module =
            import_model(&model, &OpRegistry::with_all_ops(), &ImportOptions::default()).unwrap();

        let text = format_module(&module, Emit::Text).unwrap();
        assert!(text.contains("torch.operator \"onnx.Neg\""));

        let json = format_module(&module, Emit::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.is_object());
    }
}
