//! Logging setup shared by the Syndicast binaries
//!
//! Thin wrapper over tracing-subscriber: callers pick a fallback level and
//! everything else comes from the environment. `SYNDICAST_LOG_FORMAT`
//! selects the output shape, `SYNDICAST_LOG_LEVEL` the level, and `RUST_LOG`
//! (via the env filter) overrides both for per-module filtering.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text to stderr, suitable for piping.
    Text,
    /// One JSON object per line, for log collectors.
    Json,
    /// Multi-line colored output for development.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Initialize the global subscriber from the environment.
///
/// `fallback_level` applies when neither `RUST_LOG` nor
/// `SYNDICAST_LOG_LEVEL` is set: the daemon passes "info", the status tool
/// "error", and both pass "debug" under `--verbose`.
///
/// Call once at startup; a second call panics, as tracing allows only one
/// global subscriber.
pub fn init_from_env(fallback_level: &str) {
    let format = resolve_format(std::env::var("SYNDICAST_LOG_FORMAT").ok());
    let level = resolve_level(std::env::var("SYNDICAST_LOG_LEVEL").ok(), fallback_level);
    init(format, &level);
}

/// Initialize the global subscriber with explicit settings.
pub fn init(format: LogFormat, level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
}

/// A malformed format value falls back to text rather than failing startup.
fn resolve_format(raw: Option<String>) -> LogFormat {
    raw.and_then(|s| s.parse().ok()).unwrap_or(LogFormat::Text)
}

fn resolve_level(raw: Option<String>, fallback: &str) -> String {
    raw.unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing_is_case_insensitive() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("syslog".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_format_display_round_trips() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_resolve_format_tolerates_bad_values() {
        assert_eq!(resolve_format(None), LogFormat::Text);
        assert_eq!(resolve_format(Some("json".to_string())), LogFormat::Json);
        // Never break startup over a typo in the environment.
        assert_eq!(resolve_format(Some("jsno".to_string())), LogFormat::Text);
    }

    #[test]
    fn test_resolve_level_prefers_environment() {
        assert_eq!(resolve_level(Some("trace".to_string()), "info"), "trace");
        assert_eq!(resolve_level(None, "error"), "error");
    }
}
