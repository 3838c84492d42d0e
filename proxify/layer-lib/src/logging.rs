//! Logging initialization for the layer.
//!
//! The layer lives inside somebody else's process, so stderr is often invisible. Setting
//! [`PROXIFY_LAYER_LOG_PATH`] to a directory adds a per-process log file.

use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use chrono::Local;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan, prelude::*};

/// Directory for the layer's log files.
pub const PROXIFY_LAYER_LOG_PATH: &str = "PROXIFY_LAYER_LOG_PATH";

/// Installs the global subscriber: `RUST_LOG` filter, compact stderr output, and a log file
/// when [`PROXIFY_LAYER_LOG_PATH`] is set.
///
/// Does nothing if the host process already installed a subscriber.
pub fn init_tracing() {
    let log_file = std::env::var(PROXIFY_LAYER_LOG_PATH)
        .ok()
        .and_then(|log_dir| match open_log_file(&log_dir) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("proxify-layer: failed to open log file in `{log_dir}` ({err})");
                None
            }
        });

    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_thread_ids(true)
            .with_ansi(false)
            .with_writer(file)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .compact()
    });

    // stderr must be last, otherwise ANSI codes leak into the file.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .compact()
        .with_writer(io::stderr);

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
}

fn open_log_file(log_dir: &str) -> io::Result<File> {
    let path = build_log_file_path(log_dir)?;

    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

/// `<dir>/proxify-layer_<timestamp>_<process>_pid<pid>`, creating `dir` if needed.
fn build_log_file_path(log_dir: &str) -> io::Result<PathBuf> {
    let dir_path = Path::new(log_dir);
    if dir_path.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "log directory path is empty",
        ));
    }
    std::fs::create_dir_all(dir_path)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let file_name = format!(
        "proxify-layer_{timestamp}_{}_pid{}",
        sanitized_process_name(),
        std::process::id()
    );

    Ok(dir_path.join(file_name))
}

fn sanitized_process_name() -> String {
    let name: String = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem()?.to_str().map(String::from))
        .unwrap_or_default()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;

    #[rstest]
    fn log_file_path_creates_directory() {
        let temp_dir = tempdir().unwrap();
        let log_dir = temp_dir.path().join("nested").join("logs");

        let path = build_log_file_path(log_dir.to_str().unwrap()).unwrap();

        assert!(log_dir.is_dir());
        assert_eq!(path.parent(), Some(log_dir.as_path()));

        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("proxify-layer_"));
        assert!(file_name.ends_with(&format!("_pid{}", std::process::id())));
    }

    #[rstest]
    fn empty_log_dir_is_rejected() {
        let error = build_log_file_path("").unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }

    #[rstest]
    fn opens_one_log_file() {
        let temp_dir = tempdir().unwrap();
        let log_dir = temp_dir.path().to_str().unwrap();

        let file = open_log_file(log_dir).unwrap();
        drop(file);

        let entries = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[rstest]
    fn process_name_is_sanitized() {
        let name = sanitized_process_name();

        assert!(!name.is_empty());
        assert!(
            name.chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        );
    }
}
