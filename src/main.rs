//! Purpose: `envsplit` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit stable JSON on stdout; diagnostics and notices go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use envsplit::config::{BuildConfig, CONFIG_FILE_NAME};
use envsplit::core::directives::module_directives;
use envsplit::core::error::{Error, ErrorKind, to_exit_code};
use envsplit::core::module_id::{self, Environment, ID_PREFIX};
use envsplit::engine::{BuildOutput, Engine};
use envsplit::manifest::ClientManifest;
use envsplit::notice::{Notice, notice_json};
use envsplit::plugin::compose::{ExtensionDescriptor, Pipeline};
use envsplit::plugin::resolve::RelativeResolver;
use envsplit::plugin::splitter::SplitterConfig;
use envsplit::plugin::{Plugin, PluginOption};

const MANIFEST_FILE_NAME: &str = "client-manifest.json";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;

    let result = command_dispatch::dispatch_command(cli.command, color_mode);

    result
        .map_err(add_unresolved_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "envsplit",
    version,
    about = "Split one module build pipeline into server and client graphs",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Modules whose directive prologue contains "use client" become boundaries:
the server graph imports a generated proxy, the client graph gets the real module.

Mental model:
  - `build` runs both graphs and writes output units plus a client manifest
  - `scan` shows the directive prologue of one file
  - `id` encodes or decodes environment-namespaced module ids
"#,
    after_help = r#"EXAMPLES
  $ envsplit build --server src/index.js
  $ envsplit build --server src/index.js --client src/entry-client.js --out dist
  $ envsplit scan src/counter.js
  $ envsplit id encode --env client /src/counter.js

LEARN MORE
  Settings may also live in envsplit.json next to the sources.
  Logging follows RUST_LOG (default: info).

  $ envsplit <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        global = true,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EnvironmentArg {
    Server,
    Client,
}

impl From<EnvironmentArg> for Environment {
    fn from(value: EnvironmentArg) -> Self {
        match value {
            EnvironmentArg::Server => Environment::Server,
            EnvironmentArg::Client => Environment::Client,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Build server and client output units",
        long_about = r#"Build both environment graphs from the configured entries.

Settings come from envsplit.json (in --root, or the file named by --config);
flags override the file. Output units are written under --out, grouped by
environment, with a client manifest next to them."#,
        after_help = r#"EXAMPLES
  $ envsplit build --server src/index.js
  $ envsplit build --config app/envsplit.json --no-manifest
  $ envsplit build --root app --server src/index.js --directive "use browser""#
    )]
    Build(BuildArgs),
    #[command(
        arg_required_else_help = true,
        about = "Print the directive prologue of a source file",
        after_help = r#"EXAMPLES
  $ envsplit scan src/counter.js
  # {"file":"src/counter.js","directives":[{"value":"use client","start":0,"end":13}],"boundary":true}"#
    )]
    Scan {
        #[arg(help = "Source file to scan", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Directive that marks a boundary (default: \"use client\")")]
        directive: Option<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Encode or decode environment-namespaced module ids"
    )]
    Id {
        #[command(subcommand)]
        command: IdCommand,
    },
    #[command(about = "Print version info as JSON")]
    Version,
}

#[derive(Args, Debug, Default)]
struct BuildArgs {
    #[arg(long, help = "Build config file (default: <root>/envsplit.json when present)", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, help = "Project root that entry paths resolve against", value_hint = ValueHint::DirPath)]
    root: Option<PathBuf>,
    #[arg(long = "server", value_name = "ENTRY", help = "Server entry path (repeatable)", value_hint = ValueHint::FilePath)]
    server: Vec<PathBuf>,
    #[arg(long = "client", value_name = "ENTRY", help = "Client entry path (repeatable)", value_hint = ValueHint::FilePath)]
    client: Vec<PathBuf>,
    #[arg(long = "out", value_name = "DIR", help = "Output directory (default: dist)", value_hint = ValueHint::DirPath)]
    out: Option<PathBuf>,
    #[arg(long, help = "Directive that marks a boundary (default: \"use client\")")]
    directive: Option<String>,
    #[arg(long = "no-manifest", help = "Skip writing the client manifest")]
    no_manifest: bool,
}

#[derive(Subcommand)]
enum IdCommand {
    #[command(about = "Namespace a raw id for one environment")]
    Encode {
        #[arg(long = "env", value_enum, help = "Target environment")]
        environment: EnvironmentArg,
        #[arg(help = "Raw module id")]
        raw_id: String,
    },
    #[command(about = "Split a namespaced id into environment and raw id")]
    Decode {
        #[arg(help = "Namespaced id; a leading literal `\\0` stands for the NUL prefix")]
        id: String,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_build_config(args: &BuildArgs) -> Result<BuildConfig, Error> {
    let mut config = match &args.config {
        Some(path) => BuildConfig::load(path)?,
        None => {
            let dir = args.root.clone().unwrap_or_else(|| PathBuf::from("."));
            BuildConfig::discover(&dir)?
        }
    };
    if let Some(root) = &args.root {
        config.root = root.clone();
    } else if let Some(path) = &args.config {
        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root = base.join(&config.root);
        }
    }
    for path in &args.server {
        config.add_entry(Environment::Server, path.clone());
    }
    for path in &args.client {
        config.add_entry(Environment::Client, path.clone());
    }
    if let Some(out) = &args.out {
        config.out_dir = out.clone();
    }
    if let Some(directive) = &args.directive {
        if directive.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--directive must not be empty")
                .with_hint("Omit --directive to use \"use client\"."));
        }
        config.directive = directive.clone();
    }
    if args.no_manifest {
        config.manifest = false;
    }
    Ok(config)
}

fn run_build(args: BuildArgs, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    let config = resolve_build_config(&args)?;
    let input = config.input_map()?;
    let root = config.root_dir()?;

    let resolver: Arc<dyn Plugin> = Arc::new(RelativeResolver::with_root(root.clone()));
    let pipeline = Pipeline::builder()
        .splitter_config(SplitterConfig {
            directive: config.directive.clone(),
            ..SplitterConfig::default()
        })
        .extension(ExtensionDescriptor::common(PluginOption::Plugin(resolver)))
        .build()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;
    let mut engine = Engine::new();
    let output = runtime.block_on(engine.build(pipeline.input_options(input)))?;

    for warning in &output.warnings {
        let time = notice_time_now().unwrap_or_default();
        emit_notice(&Notice::extension_warning(warning, "build", time), color_mode);
    }
    let references = pipeline.splitter().client_references();
    for reference in references.iter().filter(|reference| reference.export_names.is_empty()) {
        let time = notice_time_now().unwrap_or_default();
        emit_notice(&Notice::empty_boundary(reference, "build", time), color_mode);
    }

    let out_dir = if config.out_dir.is_absolute() {
        config.out_dir.clone()
    } else {
        root.join(&config.out_dir)
    };
    write_units(&out_dir, &output)?;

    let manifest_path = if config.manifest {
        let manifest = if references.is_empty() {
            ClientManifest::from_units(&output.units)?
        } else {
            ClientManifest::from_references(&references, &output.units)?
        };
        let path = out_dir.join(MANIFEST_FILE_NAME);
        write_json_file(&path, &serde_json::to_value(&manifest).map_err(json_encode_error)?)?;
        Some(path)
    } else {
        None
    };

    emit_json(
        build_summary_json(&out_dir, &output, manifest_path.as_deref(), references.len())?,
        color_mode,
    );
    Ok(RunOutcome::ok())
}

fn write_units(out_dir: &Path, output: &BuildOutput) -> Result<(), Error> {
    for unit in &output.units {
        let path = out_dir.join(&unit.file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| write_error(parent, err))?;
        }
        std::fs::write(&path, &unit.code).map_err(|err| write_error(&path, err))?;
    }
    Ok(())
}

fn write_json_file(path: &Path, value: &Value) -> Result<(), Error> {
    let text = serde_json::to_string_pretty(value).map_err(json_encode_error)?;
    std::fs::write(path, format!("{text}\n")).map_err(|err| write_error(path, err))
}

fn write_error(path: &Path, err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write build output")
        .with_id(path.display().to_string())
        .with_source(err)
}

fn json_encode_error(err: serde_json::Error) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("json encode failed")
        .with_source(err)
}

fn build_summary_json(
    out_dir: &Path,
    output: &BuildOutput,
    manifest: Option<&Path>,
    client_references: usize,
) -> Result<Value, Error> {
    let mut units = Vec::with_capacity(output.units.len());
    for unit in &output.units {
        units.push(json!({
            "file": unit.file_name,
            "name": unit.name,
            "environment": unit.environment()?.as_str(),
            "entry": unit.is_entry,
            "exports": unit.exports,
            "imports": unit.imports,
            "modules": unit.module_ids.len(),
        }));
    }
    Ok(json!({
        "out_dir": out_dir.display().to_string(),
        "units": units,
        "manifest": manifest.map(|path| path.display().to_string()),
        "client_references": client_references,
        "modules": output.modules.len(),
        "watch_files": output.watch_files.len(),
        "warnings": output.warnings.len(),
    }))
}

fn run_scan(file: &Path, directive: Option<String>, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    let source = std::fs::read_to_string(file).map_err(|err| {
        let kind = if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::Io
        };
        Error::new(kind)
            .with_message("failed to read source file")
            .with_id(file.display().to_string())
            .with_source(err)
    })?;
    let directive = directive.unwrap_or_else(|| envsplit::plugin::splitter::DEFAULT_DIRECTIVE.to_string());
    let directives = module_directives(&source);
    let boundary = directives.iter().any(|found| found.value == directive);
    emit_json(
        json!({
            "file": file.display().to_string(),
            "directives": directives,
            "boundary": boundary,
        }),
        color_mode,
    );
    Ok(RunOutcome::ok())
}

// Shells cannot pass NUL, so a literal `\0` prefix stands in for it.
fn parse_namespaced_arg(arg: &str) -> String {
    match arg.strip_prefix("\\0") {
        Some(rest) => format!("{ID_PREFIX}{rest}"),
        None => arg.to_string(),
    }
}

fn run_id(command: IdCommand, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    let value = match command {
        IdCommand::Encode {
            environment,
            raw_id,
        } => {
            let id = module_id::encode(&raw_id, environment.into())?;
            json!({ "id": id })
        }
        IdCommand::Decode { id } => {
            let parsed = module_id::decode(&parse_namespaced_arg(&id))?;
            json!({
                "environment": parsed.environment.as_str(),
                "raw_id": parsed.raw_id,
            })
        }
    };
    emit_json(value, color_mode);
    Ok(RunOutcome::ok())
}

fn emit_version_output(color_mode: ColorMode) {
    emit_json(
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "config_file": CONFIG_FILE_NAME,
        }),
        color_mode,
    );
}

fn add_unresolved_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::UnresolvedImport || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check the import specifier, or add an extension that resolves it.")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        ErrorKind::NotFound => err.with_hint("Check that the path exists relative to --root."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if !matches!(err.kind(), ErrorKind::Internal | ErrorKind::Invariant) || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share the extension list if it persists.",
    )
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let pretty = is_tty || color_mode.use_color(is_tty);
    let json = if pretty {
        serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    } else {
        serde_json::to_string(&value)
            .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    };
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} ({})", notice.message, notice.origin());
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Invariant => "invariant violation".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::UnresolvedImport => "unresolved import".to_string(),
        ErrorKind::UnsupportedHook => "unsupported hook".to_string(),
        ErrorKind::ExportResolution => "export resolution failed".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(id) = err.id() {
        inner.insert("id".to_string(), json!(id));
    }
    if let Some(specifier) = err.specifier() {
        inner.insert("specifier".to_string(), json!(specifier));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(specifier) = err.specifier() {
        lines.push(format!(
            "{} {specifier}",
            colorize_label("specifier:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(id) = err.id() {
        lines.push(format!(
            "{} {}",
            colorize_label("module:", use_color, AnsiColor::Yellow),
            id.replace(ID_PREFIX, "\\0")
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `envsplit --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "envsplit") else {
        return "Try `envsplit --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }
    if parts.is_empty() {
        "Try `envsplit --help`.".to_string()
    } else {
        format!("Try `envsplit {} --help`.", parts.join(" "))
    }
}
