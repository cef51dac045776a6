//! `hilapp`: rewrites the site loops of lattice programs for a CPU, SIMD or
//! GPU backend.
//!
//! Usage: `hilapp [OPTIONS] <INPUTS>...`

use anyhow::{bail, Context, Result};
use clap::Parser;
use hilapp_core::{
    CollectingDiagnosticHandler, DiagnosticHandler, DiagnosticLevel, Target, TranspileOutput,
    Transpiler, TranspilerConfig,
};
use hilapp_syntax::SourceMap;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

/// Config file picked up from the working directory when `--config` is not
/// given.
const DEFAULT_CONFIG: &str = "hilapp.yaml";

const SOURCE_EXTENSIONS: [&str; 3] = ["cpp", "h", "hpp"];

#[derive(Parser, Debug)]
#[command(name = "hilapp")]
#[command(version)]
#[command(about = "Transpile lattice site loops for CPU, SIMD and GPU backends")]
struct Cli {
    /// Source files, or directories searched for .cpp, .h and .hpp files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file (only with a single input)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Directory for generated files; defaults to next to each input
    #[arg(long = "out-dir")]
    out_dir: Option<PathBuf>,

    /// Code generation backend: cpu, vector, cuda or hip
    #[arg(long)]
    target: Option<Target>,

    /// SIMD register width in bits for the vector backend
    #[arg(long = "vector-bits")]
    vector_bits: Option<u32>,

    /// Do not overlap neighbour communication with computation
    #[arg(long = "no-overlap")]
    no_overlap: bool,

    /// Allow functions called from site loops to read global variables
    #[arg(long = "allow-func-globals")]
    allow_func_globals: bool,

    /// Comment each transformed function with its loop count
    #[arg(long = "function-info")]
    function_info: bool,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the loop analysis of each input as JSON
    #[arg(long = "emit-analysis")]
    emit_analysis: bool,

    /// Increase verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Analyze only; report diagnostics without writing code
    #[arg(long)]
    check: bool,
}

/// Outcome of one input file. Outputs are written only after every file
/// has been processed.
struct FileReport {
    path: PathBuf,
    messages: Vec<String>,
    errors: usize,
    /// The unit could not be processed at all; this ends the run.
    aborted: bool,
    outputs: Vec<(PathBuf, String)>,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<TranspilerConfig> {
    let mut config = match &cli.config {
        Some(path) => TranspilerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).is_file() => {
            TranspilerConfig::from_file(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("Failed to load configuration {}", DEFAULT_CONFIG))?
        }
        None => TranspilerConfig::default(),
    };

    if let Some(target) = cli.target {
        config.target = target;
    }
    if let Some(bits) = cli.vector_bits {
        config.vector_bits = bits;
    }
    if cli.no_overlap {
        config.overlap_communication = false;
    }
    config.allow_func_globals |= cli.allow_func_globals;
    config.function_info |= cli.function_info;
    config.verbosity = config.verbosity.max(cli.verbose);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Input files in command-line order; directories are walked in sorted
/// order.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to read directory {}", input.display()))?;
                let is_source = entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
                if is_source {
                    files.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            bail!("Input {} does not exist", input.display());
        }
    }
    Ok(files)
}

fn output_path(cli: &Cli, input: &Path, extension: &str) -> PathBuf {
    if extension == "cpt" {
        if let Some(output) = &cli.output {
            return output.clone();
        }
    }
    let stem = input.file_stem().unwrap_or_default();
    let mut name = PathBuf::from(stem);
    name.set_extension(extension);
    match &cli.out_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn process_file(cli: &Cli, config: &TranspilerConfig, path: &Path) -> Result<FileReport> {
    let source = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let handler = Arc::new(CollectingDiagnosticHandler::new());
    let transpiler = Transpiler::new(config.clone(), handler.clone());
    let result = if cli.check {
        transpiler.analyze(&source)
    } else {
        transpiler.transpile(&source)
    };

    let file = path.display().to_string();
    let mut report = FileReport {
        path: path.to_path_buf(),
        messages: Vec::new(),
        errors: handler.error_count(),
        aborted: false,
        outputs: Vec::new(),
    };

    let output: Option<TranspileOutput> = match result {
        Ok(output) => Some(output),
        Err(e) => {
            let location = match e.span() {
                Some(span) => {
                    let (line, col) = SourceMap::new(&source).line_col(span.start);
                    format!("{}:{}:{}", file, line, col)
                }
                None => file.clone(),
            };
            report.messages.push(format!("{}: error: {}", location, e));
            report.errors += 1;
            report.aborted = true;
            None
        }
    };

    let analyzed = output.as_ref().map_or(source.as_str(), |o| o.source.as_str());
    let source_map = SourceMap::new(analyzed);
    for diagnostic in handler.get_diagnostics() {
        let hidden = match diagnostic.level {
            DiagnosticLevel::Remark => config.verbosity == 0,
            // already reported as the unit's error
            DiagnosticLevel::Fatal => output.is_none(),
            _ => false,
        };
        if hidden {
            continue;
        }
        report.messages.push(diagnostic.render(&file, &source_map));
    }

    let Some(output) = output else {
        return Ok(report);
    };
    if cli.emit_analysis {
        let json = serde_json::to_string_pretty(&output.loops).context("Failed to serialize loop analysis")?;
        report.outputs.push((output_path(cli, path, "analysis.json"), json));
    }
    if !cli.check && report.errors == 0 {
        report.outputs.push((output_path(cli, path, "cpt"), output.code.clone()));
    }
    debug!(
        file = %path.display(),
        loops = output.loops.len(),
        specializations = output.specializations.len(),
        "processed file"
    );
    Ok(report)
}

fn run(cli: &Cli) -> Result<bool> {
    let config = load_config(cli)?;
    let files = collect_inputs(&cli.inputs)?;
    if files.is_empty() {
        bail!("No source files found");
    }
    if cli.output.is_some() && files.len() > 1 {
        bail!("--output can only be used with a single input file");
    }
    info!(files = files.len(), backend = %config.target, "transpiling");

    let reports = files
        .par_iter()
        .map(|path| process_file(cli, &config, path))
        .collect::<Result<Vec<FileReport>>>()?;

    let mut failed = false;
    for report in &reports {
        for message in &report.messages {
            eprintln!("{}", message);
        }
        if report.aborted {
            eprintln!("hilapp: stopping at {}; no files were written", report.path.display());
            return Ok(false);
        }
        failed |= report.errors > 0;
    }

    for report in reports {
        for (path, contents) in &report.outputs {
            write_file(path, contents)?;
            info!(input = %report.path.display(), output = %path.display(), "wrote");
        }
    }
    Ok(!failed)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if !run(&cli)? {
        process::exit(1);
    }
    Ok(())
}
