//! Curate an image collection into two mutually exclusive partitions,
//! correcting the predicted foreground of each image by hand.
//!
//! The raster engine ([`raster`], [`view`], [`mask`], [`ops`]) edits a
//! working copy against an immutable base. [`curation`] turns the working
//! copy into `<root>/include|exclude/<stem>.png`, and [`watcher`] keeps
//! those files next to their sources when another tool moves them.

pub mod cli;
pub mod curation;
pub mod error;
pub mod io;
pub mod logger;
pub mod mask;
pub mod ops;
pub mod raster;
pub mod session;
pub mod settings;
pub mod view;
pub mod watcher;

pub use curation::{CollectionReport, CurationState, Partition, PartitionDirs};
pub use error::{Error, LoadError, PredictorError, ReconciliationError, Result, WriteError};
pub use mask::SelectionMask;
pub use raster::{PixelRect, RasterDocument};
pub use session::{AutoSummary, Button, Gesture, GestureOutcome, ModeKind, Session};
pub use settings::AppSettings;
pub use view::{ScreenPoint, ViewState};
pub use watcher::{FsEvent, Reconciled, Reconciler, WatcherHandle};
