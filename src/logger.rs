//! Session logging.
//!
//! All `tracing` output goes to stderr and to a single file in the OS data
//! directory. The file is **truncated at each launch**, so it only ever holds
//! the most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\MaskCurator\maskcurator.log`
//!   Linux:    `~/.local/share/MaskCurator/maskcurator.log`
//!   macOS:    `~/Library/Application Support/MaskCurator/maskcurator.log`
//!
//! `RUST_LOG` takes precedence over the level passed to [`init`].

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Path of the current session log, once [`init`] has opened it.
pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
///
/// Failing to open the log file is not fatal: stderr logging still works.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let path = log_file_path();
    let file_layer = match open_truncated(&path) {
        Ok(file) => {
            let _ = LOG_PATH.set(path.clone());
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        Err(e) => {
            eprintln!("[logger] failed to open log file {}: {e}", path.display());
            None
        }
    };
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    if tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        return;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log = %path.display(),
        "session started"
    );

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "panic");
        prev(info);
    }));
}

fn open_truncated(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

fn log_file_path() -> PathBuf {
    data_dir().join("MaskCurator").join("maskcurator.log")
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
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}
