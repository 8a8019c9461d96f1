use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const ENV_ENABLED: &str = "ANSWER_STREAM_OBSERVABILITY_ENABLED";
const ENV_LOG_LEVEL: &str = "ANSWER_STREAM_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "ANSWER_STREAM_LOG_FORMAT";
const ENV_JSON_LOG_PATH: &str = "ANSWER_STREAM_JSON_LOG_PATH";

/// Connection lifecycle at info, everything else from dependencies at warn.
const DEFAULT_FILTER: &str = "warn,answer_stream=info";
const DEFAULT_LOG_FILE: &str = "answer-stream.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Where log records go. Everything except the file sink writes to stderr
/// so stdout stays free for rendered answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    Disabled,
    /// Human-readable single lines.
    Compact,
    /// JSON lines with the current connection span attached.
    Json,
    /// JSON lines appended to a file.
    JsonFile(PathBuf),
}

/// Tracing setup resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives, e.g. `answer_stream=debug`.
    pub filter: String,
    pub output: LogOutput,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            output: LogOutput::Compact,
        }
    }
}

impl LogSettings {
    /// Reads the settings from the process environment.
    ///
    /// - `ANSWER_STREAM_OBSERVABILITY_ENABLED`: `false`/`off`/`0` disables logging.
    /// - `ANSWER_STREAM_LOG_LEVEL`: filter directives; falls back to `RUST_LOG`.
    /// - `ANSWER_STREAM_LOG_FORMAT`: `compact` (default) or `json`.
    /// - `ANSWER_STREAM_JSON_LOG_PATH`: write JSON lines to this file instead.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let filter = value(ENV_LOG_LEVEL)
            .or_else(|| value("RUST_LOG"))
            .map_or_else(|| DEFAULT_FILTER.to_string(), |v| v.trim().to_string());
        let enabled = value(ENV_ENABLED)
            .and_then(|v| parse_switch(&v))
            .unwrap_or(true);

        let output = if !enabled {
            LogOutput::Disabled
        } else if let Some(path) = value(ENV_JSON_LOG_PATH) {
            LogOutput::JsonFile(PathBuf::from(path.trim()))
        } else if value(ENV_LOG_FORMAT).is_some_and(|v| v.trim().eq_ignore_ascii_case("json")) {
            LogOutput::Json
        } else {
            LogOutput::Compact
        };
        Self { filter, output }
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Splits a log file path into the directory to create and the file name.
fn log_file_location(path: &Path) -> (&Path, &str) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    (dir, file_name)
}

/// Installs the global subscriber from [`LogSettings::from_env`].
///
/// Returns `true` when this call installed it. Later calls, and calls made
/// after another subscriber was set, change nothing.
pub fn init_observability() -> bool {
    init_with(LogSettings::from_env())
}

/// Installs the global subscriber from explicit settings, once per process.
pub fn init_with(settings: LogSettings) -> bool {
    let mut installed = false;
    INIT.get_or_init(|| installed = install(settings));
    installed
}

fn install(settings: LogSettings) -> bool {
    let (filter, filter_error) = match EnvFilter::try_new(&settings.filter) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(DEFAULT_FILTER), Some(err)),
    };

    let result = match &settings.output {
        LogOutput::Disabled => return false,
        LogOutput::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogOutput::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogOutput::JsonFile(path) => {
            let (dir, file_name) = log_file_location(path);
            if let Err(err) = std::fs::create_dir_all(dir) {
                eprintln!("answer-stream: cannot create log directory {}: {err}", dir.display());
                return false;
            }
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(false)
                        .with_writer(tracing_appender::rolling::never(dir, file_name)),
                )
                .try_init()
        }
    };

    let installed = result.is_ok();
    if installed && let Some(err) = filter_error {
        warn!(filter = %settings.filter, error = %err, "invalid log filter; using the default");
    }
    installed
}
