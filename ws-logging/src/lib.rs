//! Tracing subscriber setup shared by the workspace manager binaries.
//!
//! Output is driven by environment variables so the same binary can log
//! human-readable text during development and JSON lines in production.

use std::{env, path::PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive, fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Crates whose debug output drowns out ours.
const NOISY_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "tokio=warn", "sqlx=warn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    None,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            output: LogOutput::Console,
            file_path: env::temp_dir().join("ws-api.log"),
        }
    }
}

impl LogSettings {
    /// Read `WS_LOG_LEVEL`, `WS_LOG_FORMAT`, `WS_LOG_OUTPUT` and `WS_LOG_FILE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let format = match lookup("WS_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };

        let output = match lookup("WS_LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            Some("none") => LogOutput::None,
            _ => LogOutput::Console,
        };

        Self {
            level: lookup("WS_LOG_LEVEL").unwrap_or(defaults.level),
            format,
            output,
            file_path: lookup("WS_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }

    fn filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for target in NOISY_TARGETS {
            if let Ok(directive) = target.parse::<Directive>() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Human => layer.pretty().boxed(),
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the
/// lifetime of the process. Calling this twice is harmless, the second
/// call leaves the first subscriber in place.
pub fn init_subscriber(settings: &LogSettings) -> Option<WorkerGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if settings.output.console() {
        layers.push(fmt_layer(settings.format, std::io::stdout, true));
    }

    if settings.output.file() {
        let dir = settings
            .file_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let file_name = settings
            .file_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "ws-api.log".into());

        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        layers.push(fmt_layer(settings.format, writer, false));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(settings.filter())
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> LogSettings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = settings_from(&[]);
        assert_eq!(settings.level, "info");
        assert_eq!(settings.format, LogFormat::Human);
        assert_eq!(settings.output, LogOutput::Console);
    }

    #[test]
    fn test_json_file_output() {
        let settings = settings_from(&[
            ("WS_LOG_FORMAT", "json"),
            ("WS_LOG_OUTPUT", "both"),
            ("WS_LOG_FILE", "/var/log/ws/api.log"),
            ("WS_LOG_LEVEL", "debug"),
        ]);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.output.console());
        assert!(settings.output.file());
        assert_eq!(settings.file_path, PathBuf::from("/var/log/ws/api.log"));
        assert_eq!(settings.level, "debug");
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let settings = settings_from(&[("WS_LOG_FORMAT", "xml"), ("WS_LOG_OUTPUT", "syslog")]);
        assert_eq!(settings.format, LogFormat::Human);
        assert_eq!(settings.output, LogOutput::Console);
    }
}
