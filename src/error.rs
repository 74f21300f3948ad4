use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Decoding a source image or a stored curated file failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{path} has zero width or height")]
    ZeroDimensions { path: PathBuf },
    #[error("{path} is {actual:?} but the source image is {expected:?}")]
    DimensionMismatch {
        path: PathBuf,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Writing a curated file failed. The destination is never left truncated.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create temp file in {dir}: {source}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove stale {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render settings: {0}")]
    Settings(#[from] toml::ser::Error),
}

/// The external matting predictor could not produce a usable alpha matte.
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("matting predictor unavailable: {0}")]
    Unavailable(String),
    #[error("matting predictor timed out after {0:?}")]
    Timeout(Duration),
    #[error("matting predictor failed: {0}")]
    Failed(String),
    #[error("invalid predictor output: {0}")]
    InvalidOutput(String),
    #[error("predictor i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Curation state on disk is inconsistent. Reported, never fatal to the watcher.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("{filename} deleted again before its move completed (was {previous}, now {replacement})")]
    DuplicatePending {
        filename: String,
        previous: PathBuf,
        replacement: PathBuf,
    },
    #[error("{filename} is unknown: no curated file under {from}")]
    UnknownFile { filename: String, from: PathBuf },
    #[error("{stem} is present in both partitions under {root}")]
    BothPartitions { stem: String, root: PathBuf },
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Predictor(#[from] PredictorError),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    #[error("no images found in {0}")]
    NoImages(PathBuf),
    #[error("start position {start} is outside the collection (1..={len})")]
    StartOutOfRange { start: usize, len: usize },
    #[error("no document is open")]
    NoDocument,
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
