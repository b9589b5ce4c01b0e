//! Purpose: `appendcache` CLI entry point.
//! Role: Binary crate root; parses args, installs tracing, runs commands, emits JSON on stdout.
//! Invariants: Commands emit one JSON document on stdout.
//! Invariants: Errors are emitted as JSON on stderr unless stderr is a terminal.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All file writes go through the appender cache.
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::SystemTime;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod config;

use appendcache::api::{
    CacheBuilder, CacheStats, DEFAULT_CACHE_SIZE, Error, ErrorKind, FileAppenderCache,
    FileAppenderFactory, to_exit_code,
};
use config::{ParamOverrides, load_params};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

#[derive(Parser)]
#[command(
    name = "appendcache",
    version,
    about = "Append lines to many files through a bounded cache of open handles",
    after_help = r#"EXAMPLES
  $ printf 'a\nb\n' | appendcache write app.log
  $ printf 'web\tGET /\ndb\tslow query\n' | appendcache --cache-size 2 route ./logs
  $ appendcache stat app.log
  $ appendcache mutex-name app.log

NOTES
  - RUST_LOG controls diagnostics on stderr (default: warn)
  - APPENDCACHE_CONFIG names a JSON parameters file (overridden by --config)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value_t = DEFAULT_CACHE_SIZE,
        help = "Number of file handles kept open at once"
    )]
    cache_size: usize,
    #[arg(
        long,
        help = "JSON file with create-file parameters",
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,
    #[command(flatten)]
    params: ParamFlags,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct ParamFlags {
    #[arg(long, help = "Lock and flush around every write so several processes can append")]
    concurrent_writes: bool,
    #[arg(long, help = "Fail instead of creating missing parent directories")]
    no_create_dirs: bool,
    #[arg(long, help = "Track the last write time of each open file")]
    capture_last_write_time: bool,
    #[arg(long, help = "Hold a named archive mutex per open file")]
    archive_mutex: bool,
    #[arg(long, help = "Always use the portable open path")]
    force_managed: bool,
    #[arg(long, help = "Write buffer size in bytes (0 disables buffering)")]
    buffer_size: Option<usize>,
    #[arg(long, help = "Open attempts under lock contention (with --concurrent-writes)")]
    retry_attempts: Option<u32>,
    #[arg(long, help = "Initial backoff between open attempts, in milliseconds")]
    retry_delay_ms: Option<u64>,
}

impl ParamFlags {
    fn overrides(&self) -> ParamOverrides {
        ParamOverrides {
            concurrent_writes: self.concurrent_writes,
            no_create_dirs: self.no_create_dirs,
            capture_last_write_time: self.capture_last_write_time,
            archive_mutex: self.archive_mutex,
            force_managed: self.force_managed,
            buffer_size: self.buffer_size,
            retry_attempts: self.retry_attempts,
            retry_delay_ms: self.retry_delay_ms,
        }
    }
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

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Append lines to one or more files",
        long_about = r#"Append lines to files through the cache.

Lines come from --line (repeatable) or stdin. With several files, lines are
distributed round-robin across them in the order given."#
    )]
    Write {
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        files: Vec<PathBuf>,
        #[arg(long = "line", help = "Line to append (repeatable); stdin is read when absent")]
        lines: Vec<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Route tab-separated stdin lines to per-name files",
        long_about = r#"Read `name<TAB>text` lines from stdin and append `text` to `<DIR>/<name>.<ext>`.

With more names than --cache-size, least recently used files are closed and reopened on demand."#
    )]
    Route {
        #[arg(value_hint = ValueHint::DirPath)]
        dir: PathBuf,
        #[arg(long, default_value = "log", help = "Extension for routed files")]
        ext: String,
        #[arg(
            long,
            help = "Glob (e.g. ./logs/*.1.log) whose new files force all handles to reopen"
        )]
        archive_pattern: Option<PathBuf>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Show length and timestamps for files"
    )]
    Stat {
        #[arg(required = true, value_hint = ValueHint::FilePath)]
        paths: Vec<PathBuf>,
    },
    #[command(
        name = "mutex-name",
        arg_required_else_help = true,
        about = "Print the archive mutex name for a file"
    )]
    MutexName {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Probe the mutex for this many milliseconds")]
        probe_ms: Option<u64>,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info as JSON")]
    Version,
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
    let cli = match Cli::try_parse() {
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
                return Ok(RunOutcome { exit_code });
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Run `appendcache --help` for usage."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli, color_mode).map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn build_cache(cli: &Cli) -> Result<FileAppenderCache<FileAppenderFactory>, Error> {
    let params = load_params(cli.config.as_deref(), &cli.params.overrides())?;
    tracing::debug!(size = cli.cache_size, ?params, "building appender cache");
    CacheBuilder::new()
        .with_size(cli.cache_size)
        .with_params(params)
        .build()
}

fn format_time(stamp: Option<SystemTime>) -> Value {
    use time::format_description::well_known::Rfc3339;
    stamp
        .and_then(|stamp| time::OffsetDateTime::from(stamp).format(&Rfc3339).ok())
        .map_or(Value::Null, Value::String)
}

fn cache_json(cache: &FileAppenderCache<FileAppenderFactory>) -> Value {
    let stats: CacheStats = cache.stats();
    json!({
        "size": cache.size(),
        "open": cache.len(),
        "files": cache
            .file_names()
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>(),
        "stats": stats,
    })
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let pretty = is_tty || color_mode.use_color(is_tty);
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
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

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "file is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Closed => "appender is closed".to_string(),
        ErrorKind::Unsupported => "not supported on this platform".to_string(),
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
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
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
    if let Some(path) = err.path() {
        lines.push(format!("  path: {}", path.display()));
    }
    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}
