use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crosswalk::{
    Crosswalk, Format, FunctionRegistry, decode, execute_rules, parse_crosswalk,
    sort_columns, transform_with_warnings, validate_crosswalk,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crosswalk")]
#[command(version, about = "Run crosswalk mapping rules against CSV/XML/JSON documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transform an input document and write the result
    Transform(TransformArgs),
    /// Check a crosswalk file without running it
    Validate {
        #[arg(short = 'r', long = "rules")]
        rules: PathBuf,
    },
    /// Print the sorted column map produced for an input document
    Columns {
        #[arg(short = 'r', long = "rules")]
        rules: PathBuf,
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
    },
}

#[derive(Args)]
struct TransformArgs {
    #[arg(short = 'r', long = "rules")]
    rules: PathBuf,
    #[arg(short = 'i', long = "input")]
    input: PathBuf,
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    #[arg(long, value_enum)]
    source_format: Option<FormatArg>,
    #[arg(long, value_enum)]
    target_format: Option<FormatArg>,
    #[arg(long)]
    root_element: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Csv,
    Xml,
    Json,
}

impl From<FormatArg> for Format {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => Format::Csv,
            FormatArg::Xml => Format::Xml,
            FormatArg::Json => Format::Json,
        }
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Transform(args) => run_transform(args),
        Command::Validate { rules } => run_validate(&rules),
        Command::Columns { rules, input } => run_columns(&rules, &input),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_transform(args: TransformArgs) -> Result<ExitCode> {
    let mut crosswalk = load_crosswalk(&args.rules)?;
    if let Some(format) = args.source_format {
        crosswalk.source_format = format.into();
    }
    if let Some(format) = args.target_format {
        crosswalk.target_format = format.into();
    }
    if let Some(root_element) = args.root_element {
        crosswalk.root_element = Some(root_element);
    }

    let input = read_file(&args.input)?;
    let registry = FunctionRegistry::with_builtins();
    let (output, warnings) = transform_with_warnings(&crosswalk, &input, &registry)?;
    for warning in &warnings {
        eprintln!("warning: {}", warning);
    }

    match &args.output {
        Some(path) => {
            fs::write(path, &output)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(output = %path.display(), warnings = warnings.len(), "transform finished");
        }
        None => println!("{}", output),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_validate(rules: &Path) -> Result<ExitCode> {
    let crosswalk = load_crosswalk(rules)?;
    match validate_crosswalk(&crosswalk) {
        Ok(()) => {
            println!("ok");
            Ok(ExitCode::SUCCESS)
        }
        Err(errors) => {
            for err in &errors {
                println!("{}", err);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_columns(rules: &Path, input: &Path) -> Result<ExitCode> {
    let crosswalk = load_crosswalk(rules)?;
    validate_crosswalk(&crosswalk).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|err| err.to_string()).collect();
        anyhow::anyhow!("invalid crosswalk: {}", messages.join("; "))
    })?;

    let doc = decode(&read_file(input)?, crosswalk.source_format)?;
    let registry = FunctionRegistry::with_builtins();
    let execution = execute_rules(&doc, &crosswalk.rules, &registry)?;
    debug!(columns = execution.columns.len(), "rules executed");

    let columns: JsonMap<String, JsonValue> = sort_columns(&execution.columns).into_iter().collect();
    let text = serde_json::to_string_pretty(&JsonValue::Object(columns))
        .context("failed to render column map")?;
    println!("{}", text);
    Ok(ExitCode::SUCCESS)
}

fn load_crosswalk(path: &Path) -> Result<Crosswalk> {
    let yaml = read_file(path)?;
    parse_crosswalk(&yaml).with_context(|| format!("failed to parse {}", path.display()))
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
