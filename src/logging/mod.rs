//! ## Sets up logging by reading configuration from environment variables.
//!
//! Environment variables used:
//! - LOG_MODE: "stdout" (default) or "file"
//! - LOG_LEVEL: log level ("trace", "debug", "info", "warn", "error"); default is "info"
//! - LOG_FORMAT: output format ("compact" (default), "pretty", "json")
//! - LOG_DATA_DIR: when using file mode, the directory of the log file (default "./logs")

use chrono::Utc;
use std::{
    env,
    fs::{create_dir_all, metadata, File, OpenOptions},
    path::Path,
};
use tracing_appender::non_blocking;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::constants::{
    DEFAULT_LOG_DIR, DEFAULT_LOG_FORMAT, DEFAULT_LOG_LEVEL, DEFAULT_LOG_MODE,
    DEFAULT_MAX_LOG_FILE_SIZE, LOG_FILE_NAME,
};

/// Computes the path of the rolled log file given the base file path and the date string.
pub fn compute_rolled_file_path(base_file_path: &str, date_str: &str, index: u32) -> String {
    if base_file_path.ends_with(".log") {
        let trimmed = base_file_path.strip_suffix(".log").unwrap_or(base_file_path);
        format!("{trimmed}-{date_str}.{index}.log")
    } else {
        format!("{base_file_path}-{date_str}.{index}.log")
    }
}

/// Checks if the given log file exceeds the maximum allowed size (in bytes).
/// If so, it appends a sequence number to generate a new file name.
/// Returns the final log file path to use.
pub fn space_based_rolling(
    file_path: &str,
    base_file_path: &str,
    date_str: &str,
    max_size: u64,
) -> String {
    let mut final_path = file_path.to_string();
    let mut index = 1;
    while let Ok(file_metadata) = metadata(&final_path) {
        if file_metadata.len() > max_size {
            final_path = compute_rolled_file_path(base_file_path, date_str, index);
            index += 1;
        } else {
            break;
        }
    }
    final_path
}

/// Sets up logging by reading configuration from environment variables.
pub fn setup_logging() {
    // Set RUST_LOG from LOG_LEVEL if RUST_LOG is not already set
    if env::var_os("RUST_LOG").is_none() {
        if let Ok(level) = env::var("LOG_LEVEL") {
            env::set_var("RUST_LOG", level);
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_string());
    let log_mode = env::var("LOG_MODE").unwrap_or_else(|_| DEFAULT_LOG_MODE.to_string());

    if log_mode.eq_ignore_ascii_case("file") {
        let log_dir = env::var("LOG_DATA_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string());
        let log_dir = format!("{}/", log_dir.trim_end_matches('/'));

        let now = Utc::now();
        let date_str = now.format("%Y-%m-%d").to_string();
        let base_file_path = format!("{log_dir}{LOG_FILE_NAME}");

        if let Some(parent) = Path::new(&base_file_path).parent() {
            create_dir_all(parent).expect("Failed to create log directory");
        }

        let time_based_path = compute_rolled_file_path(&base_file_path, &date_str, 1);
        let max_size = match env::var("LOG_MAX_SIZE") {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                panic!("LOG_MAX_SIZE must be a valid u64 if set");
            }),
            Err(_) => DEFAULT_MAX_LOG_FILE_SIZE,
        };
        let final_path =
            space_based_rolling(&time_based_path, &base_file_path, &date_str, max_size);

        let file = if Path::new(&final_path).exists() {
            OpenOptions::new()
                .append(true)
                .open(&final_path)
                .expect("Failed to open log file")
        } else {
            File::create(&final_path).expect("Failed to create log file")
        };

        let (non_blocking_writer, guard) = non_blocking(file);
        Box::leak(Box::new(guard)); // Keep guard alive for the lifetime of the program

        let file_layer = fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false);
        match format.to_lowercase().as_str() {
            "json" => tracing_subscriber::registry()
                .with(env_filter)
                .with(ErrorLayer::default())
                .with(file_layer.json())
                .init(),
            "pretty" => tracing_subscriber::registry()
                .with(env_filter)
                .with(ErrorLayer::default())
                .with(file_layer.pretty())
                .init(),
            _ => tracing_subscriber::registry()
                .with(env_filter)
                .with(ErrorLayer::default())
                .with(file_layer.compact())
                .init(),
        }
    } else {
        let stdout_layer = fmt::layer();
        match format.to_lowercase().as_str() {
            "json" => tracing_subscriber::registry()
                .with(env_filter)
                .with(ErrorLayer::default())
                .with(stdout_layer.json())
                .init(),
            "pretty" => tracing_subscriber::registry()
                .with(env_filter)
                .with(ErrorLayer::default())
                .with(stdout_layer.pretty())
                .init(),
            _ => tracing_subscriber::registry()
                .with(env_filter)
                .with(ErrorLayer::default())
                .with(stdout_layer.compact())
                .init(),
        }
    }
}
