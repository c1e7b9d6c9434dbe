//! Logging setup
//!
//! Console output by default; daily-rotated files under `log_dir` when it
//! is set. `RUST_LOG` overrides the configured level.

use std::path::Path;

use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::EnvFilter;

fn default_filter(level: &str) -> String {
    format!("planogram_server={level},shared={level},tower_http={level},sqlx=warn")
}

fn file_appender(dir: &str) -> Option<RollingFileAppender> {
    let path = Path::new(dir);
    if let Err(e) = std::fs::create_dir_all(path) {
        eprintln!("Log directory {dir} unavailable, logging to stdout: {e}");
        return None;
    }
    Some(tracing_appender::rolling::daily(path, "planogram-server"))
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_logger(log_level: &str, json: bool, log_dir: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    match (json, log_dir.and_then(file_appender)) {
        (true, Some(writer)) => subscriber.json().with_writer(writer).init(),
        (true, None) => subscriber.json().init(),
        (false, Some(writer)) => subscriber.with_ansi(false).with_writer(writer).init(),
        (false, None) => subscriber.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let directives = default_filter("debug");
        assert!(directives.starts_with("planogram_server=debug"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
