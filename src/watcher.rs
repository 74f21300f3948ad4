//! Mirror externally moved source images into the partition directories.
//!
//! When another tool moves `x/a.png` to `y/a.png`, the curated copy at
//! `x/include/a.png` (or `x/exclude/a.png`) has to follow it to
//! `y/include/a.png`. The OS reports such a move as an unordered pair of
//! delete + create events, sometimes from different threads. Callbacks only
//! push typed events into a bounded queue; a single consumer thread owns the
//! table of pending departures and pairs them up by filename.
//!
//! Pairing is by filename alone. A delete that never gets its create stays
//! pending until the watcher is restarted, so a later unrelated file with the
//! same name anywhere in the tree is taken as the other half of that move.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::curation::{Partition, PartitionDirs, stem_of};
use crate::error::{Error, ReconciliationError, Result};
use crate::settings::AppSettings;

/// A filesystem change the reconciler cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Deleted(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created(p) | FsEvent::Deleted(p) => p,
        }
    }
}

/// What handling one event did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// Inside a partition directory, or not a file event at all.
    Ignored,
    /// A delete was recorded and now waits for its create.
    Pending { filename: String, origin: PathBuf },
    /// A create with no matching delete.
    NewFile { path: PathBuf },
    /// The file reappeared in the directory it left; nothing to move.
    Returned { filename: String },
    /// A curated file followed its source.
    Moved {
        partition: Partition,
        from: PathBuf,
        to: PathBuf,
    },
}

/// Pairs delete/create events by filename and moves curated files along.
///
/// Pure apart from the final rename, so it can be driven synchronously.
#[derive(Debug)]
pub struct Reconciler {
    dirs: PartitionDirs,
    pending: HashMap<String, PathBuf>,
}

impl Reconciler {
    pub fn new(dirs: PartitionDirs) -> Self {
        Self {
            dirs,
            pending: HashMap::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_origin(&self, filename: &str) -> Option<&Path> {
        self.pending.get(filename).map(PathBuf::as_path)
    }

    pub fn handle(&mut self, event: &FsEvent) -> Result<Reconciled, ReconciliationError> {
        let path = event.path();
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(Reconciled::Ignored);
        };
        // partition contents are curation state, and so are the partition dirs
        if self.dirs.partition_of(dir).is_some() || self.dirs.is_partition_name(name) {
            return Ok(Reconciled::Ignored);
        }
        let filename = name.to_string_lossy().into_owned();

        match event {
            FsEvent::Deleted(_) => {
                let origin = dir.to_path_buf();
                match self.pending.insert(filename.clone(), origin.clone()) {
                    None => {
                        tracing::debug!(%filename, pending = self.pending.len(), "departure recorded");
                        Ok(Reconciled::Pending { filename, origin })
                    }
                    Some(previous) => Err(ReconciliationError::DuplicatePending {
                        filename,
                        previous,
                        replacement: origin,
                    }),
                }
            }
            FsEvent::Created(_) => match self.pending.remove(&filename) {
                None => Ok(Reconciled::NewFile {
                    path: path.to_path_buf(),
                }),
                Some(origin) if origin == dir => Ok(Reconciled::Returned { filename }),
                Some(origin) => self.relocate(&filename, &origin, dir, &stem_of(path)),
            },
        }
    }

    fn relocate(
        &self,
        filename: &str,
        origin: &Path,
        destination: &Path,
        stem: &str,
    ) -> Result<Reconciled, ReconciliationError> {
        let Some(partition) = Partition::ALL
            .into_iter()
            .find(|p| self.dirs.curated_path(origin, *p, stem).is_file())
        else {
            return Err(ReconciliationError::UnknownFile {
                filename: filename.to_string(),
                from: origin.to_path_buf(),
            });
        };

        let from = self.dirs.curated_path(origin, partition, stem);
        let to = self.dirs.curated_path(destination, partition, stem);
        let move_err = |source| ReconciliationError::Move {
            from: from.clone(),
            to: to.clone(),
            source,
        };
        fs::create_dir_all(self.dirs.dir(destination, partition)).map_err(move_err)?;
        fs::rename(&from, &to).map_err(move_err)?;
        Ok(Reconciled::Moved { partition, from, to })
    }
}

/// One reconciliation result, as surfaced to whoever is listening.
#[derive(Debug)]
pub struct Report {
    pub event: FsEvent,
    pub result: Result<Reconciled, ReconciliationError>,
}

pub enum WatchCommand {
    Event(FsEvent),
    Shutdown,
}

/// Map a raw OS notification onto the events the reconciler understands.
/// Directory and data-modification events are dropped.
pub fn translate(event: &notify::Event) -> Vec<FsEvent> {
    let paths = event.paths.iter().cloned();
    match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Create(_) => paths.map(FsEvent::Created).collect(),
        EventKind::Remove(_) => paths.map(FsEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => paths.map(FsEvent::Deleted).collect(),
            RenameMode::To => paths.map(FsEvent::Created).collect(),
            // the From and To halves have already been delivered on their own
            RenameMode::Both => Vec::new(),
            // backends that cannot tell which side of a rename this is
            _ => paths
                .map(|p| {
                    if p.exists() {
                        FsEvent::Created(p)
                    } else {
                        FsEvent::Deleted(p)
                    }
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// Consume events until shutdown or until every sender is gone.
///
/// Reconciliation errors are logged and reported; they never end the loop.
pub fn run_reconcile_loop(
    mut reconciler: Reconciler,
    rx: Receiver<WatchCommand>,
    reports: Option<Sender<Report>>,
) {
    while let Ok(cmd) = rx.recv() {
        let event = match cmd {
            WatchCommand::Event(event) => event,
            WatchCommand::Shutdown => break,
        };
        let result = reconciler.handle(&event);
        match &result {
            Ok(Reconciled::Moved { from, to, .. }) => {
                tracing::info!(from = %from.display(), to = %to.display(), "curated file moved");
            }
            Ok(Reconciled::Ignored) => {}
            Ok(other) => tracing::debug!(event = ?event, outcome = ?other, "reconciled"),
            Err(err) => tracing::error!(error = %err, "reconciliation failed"),
        }
        if let Some(tx) = &reports
            && tx.send(Report { event, result }).is_err()
        {
            tracing::debug!("report receiver dropped");
        }
    }
    tracing::debug!(pending = reconciler.pending_len(), "reconciler stopped");
}

/// A running watcher: OS subscription plus the consumer thread.
///
/// The pending table lives in the consumer, so it is discarded when the
/// handle is dropped and a new `start` begins with no pending moves.
pub struct WatcherHandle {
    tx: Sender<WatchCommand>,
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn start(root: &Path, settings: &AppSettings, reports: Option<Sender<Report>>) -> Result<Self> {
        let (tx, rx) = crossbeam::channel::bounded(settings.watch_queue_capacity.max(1));
        let reconciler = Reconciler::new(PartitionDirs::from_settings(settings));
        let worker = thread::Builder::new()
            .name("maskcurator-reconcile".to_string())
            .spawn(move || run_reconcile_loop(reconciler, rx, reports))?;

        let callback_tx = tx.clone();
        let watch_err = |source| Error::Watch {
            path: root.to_path_buf(),
            source,
        };
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for fs_event in translate(&event) {
                    // blocks when the queue is full; errors once the consumer is gone
                    if callback_tx.send(WatchCommand::Event(fs_event)).is_err() {
                        break;
                    }
                }
            }
            Err(err) => tracing::warn!(error = %err, "watch notification error"),
        })
        .map_err(watch_err)?;
        watcher.watch(root, RecursiveMode::Recursive).map_err(watch_err)?;
        tracing::info!(root = %root.display(), "watching for moves");

        Ok(Self {
            tx,
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }

    /// Feed an event as if the OS had delivered it.
    pub fn inject(&self, event: FsEvent) -> bool {
        self.tx.send(WatchCommand::Event(event)).is_ok()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // stop OS callbacks before asking the consumer to finish
        drop(self.watcher.take());
        let _ = self.tx.send(WatchCommand::Shutdown);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("reconciler thread panicked");
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
