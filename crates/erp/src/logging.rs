//! `tracing` subscriber setup.

use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Environment variable holding a filter directive, e.g. `erp_query=debug`.
pub const LOG_FILTER_ENV: &str = "ERP_LOG";
/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "ERP_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Human,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" => Ok(Self::Human),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown log format: {other}")),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Defaults overridden by [`LOG_FILTER_ENV`] and [`LOG_FORMAT_ENV`].
    /// Blank or unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|v| !v.trim().is_empty()) {
            config.filter = filter.trim().to_string();
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV).and_then(|v| v.parse().ok()) {
            config.format = format;
        }
        config
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// Returns false if a subscriber was already installed. An invalid filter
/// falls back to `info`.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Human => builder.with_target(false).try_init(),
        LogFormat::Compact => builder.compact().with_target(true).try_init(),
        LogFormat::Json => builder
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse(), Ok(LogFormat::Json));
        assert_eq!(" compact ".parse(), Ok(LogFormat::Compact));
        assert_eq!("pretty".parse(), Ok(LogFormat::Human));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = LogConfig::from_lookup(lookup(&[
            (LOG_FILTER_ENV, "erp_query=debug"),
            (LOG_FORMAT_ENV, "json"),
        ]));
        assert_eq!(config.filter, "erp_query=debug");
        assert_eq!(config.format, LogFormat::Json);

        let config = LogConfig::from_lookup(lookup(&[(LOG_FILTER_ENV, "  "), (LOG_FORMAT_ENV, "xml")]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_init_only_once() {
        let config = LogConfig::default().with_filter("not a [valid filter");
        let _ = init(&config);
        assert!(!init(&config.with_format(LogFormat::Compact)));
    }
}
