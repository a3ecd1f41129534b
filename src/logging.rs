/// Logging setup: multi-layer tracing with background file rotation.
///
/// Three outputs:
/// - `logs/mirror.log` - human-readable text, daily rotation
/// - `logs/mirror.json.log` - structured JSON for parsing/analysis
/// - stdout - compact progress output for the terminal
///
/// `RUST_LOG` controls filtering (default "info"), e.g.
/// `RUST_LOG=sitemirror=debug,reqwest=warn`.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Failed to create EnvFilter");

    let text_file_appender = tracing_appender::rolling::daily(log_path, "mirror.log");
    let (text_writer, _text_guard) = tracing_appender::non_blocking(text_file_appender);

    let json_file_appender = tracing_appender::rolling::daily(log_path, "mirror.json.log");
    let (json_writer, _json_guard) = tracing_appender::non_blocking(json_file_appender);

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter.clone());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_filter(env_filter.clone());

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .compact()
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .init();

    // Writer guards must outlive the program; leak them rather than
    // threading them through every caller.
    Box::leak(Box::new(_text_guard));
    Box::leak(Box::new(_json_guard));

    tracing::info!("Logging initialized, writing to {}", log_path.display());

    Ok(())
}

/// Convenience wrapper placing logs in a `logs/` subdirectory of the
/// output root.
pub fn init_logging_in_output_dir<P: AsRef<Path>>(
    output_root: P,
) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(output_root.as_ref().join("logs"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    #[test]
    fn test_log_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs");

        // init_logging panics when a global subscriber already exists,
        // so only the directory side effect is exercised here.
        std::fs::create_dir_all(&log_path).unwrap();
        assert!(log_path.exists());
    }
}
