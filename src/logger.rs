//! Session logger: routes all `tracing` output to a single file in the OS data directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\ShotMark\shotmark.log`
//!   Linux:    `~/.local/share/ShotMark/shotmark.log`
//!   macOS:    `~/Library/Application Support/ShotMark/shotmark.log`
//!
//! Library code logs through the ordinary `tracing::{info, warn, error, debug}`
//! macros. Nothing is written anywhere until [`init`] installs the subscriber,
//! so tests and embedders stay silent unless they opt in.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise the session logger. Call once, before any logging.
///
/// * Creates (or truncates) the log file.
/// * Installs a `tracing` subscriber writing to it (`RUST_LOG` overrides the
///   default `info` filter).
/// * Installs a panic hook that logs the panic before running the default handler.
///
/// `verbose` mirrors the log to stderr instead of the file, for CLI `--verbose`.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if verbose {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let path = log_file_path();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path);

        match file {
            Ok(f) => {
                let _ = LOG_PATH.set(path.clone());
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(f))
                    .try_init();
            }
            Err(e) => {
                // Can't open log file (not fatal), fall back to stderr
                eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }
    }

    tracing::info!("=== ShotMark session started ===");
    if let Some(path) = log_path() {
        tracing::info!("Log file: {}", path.display());
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC: {}", info);
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("ShotMark").join("shotmark.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}
