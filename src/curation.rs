//! Include/exclude partitioning of a collection.
//!
//! There is no metadata store: a document is curated into a partition exactly
//! when `<root>/<partition>/<stem>.png` exists. Commits write the new file
//! before removing the one in the other partition, so a crash in between can
//! leave a duplicate (reported at load) but never lose the curated result.

use image::RgbaImage;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, ReconciliationError, Result, WriteError};
use crate::io::{CURATED_EXTENSION, write_png_atomic};
use crate::settings::AppSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    Include,
    Exclude,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Include, Partition::Exclude];

    pub fn other(self) -> Self {
        match self {
            Partition::Include => Partition::Exclude,
            Partition::Exclude => Partition::Include,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Partition::Include => "include",
            Partition::Exclude => "exclude",
        }
    }
}

impl std::str::FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "include" | "in" => Ok(Partition::Include),
            "exclude" | "ex" => Ok(Partition::Exclude),
            other => Err(format!("unknown partition '{other}'")),
        }
    }
}

/// Directory names of the two partitions, relative to a collection root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionDirs {
    include: String,
    exclude: String,
}

impl Default for PartitionDirs {
    fn default() -> Self {
        Self {
            include: "include".into(),
            exclude: "exclude".into(),
        }
    }
}

impl PartitionDirs {
    pub fn new(include: impl Into<String>, exclude: impl Into<String>) -> Self {
        Self {
            include: include.into(),
            exclude: exclude.into(),
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(settings.include_dir.clone(), settings.exclude_dir.clone())
    }

    pub fn name(&self, partition: Partition) -> &str {
        match partition {
            Partition::Include => &self.include,
            Partition::Exclude => &self.exclude,
        }
    }

    pub fn dir(&self, root: &Path, partition: Partition) -> PathBuf {
        root.join(self.name(partition))
    }

    /// `<root>/<partition>/<stem>.png`
    pub fn curated_path(&self, root: &Path, partition: Partition, stem: &str) -> PathBuf {
        self.dir(root, partition)
            .join(format!("{stem}.{CURATED_EXTENSION}"))
    }

    /// Whether a directory with this name holds curation state.
    pub fn is_partition_name(&self, name: &OsStr) -> bool {
        name == OsStr::new(&self.include) || name == OsStr::new(&self.exclude)
    }

    /// Which partition, if any, a directory path denotes.
    pub fn partition_of(&self, dir: &Path) -> Option<Partition> {
        let name = dir.file_name()?;
        Partition::ALL
            .into_iter()
            .find(|p| name == OsStr::new(self.name(*p)))
    }

    /// Create both partition directories under `root` if missing.
    pub fn ensure(&self, root: &Path) -> std::io::Result<()> {
        for p in Partition::ALL {
            fs::create_dir_all(self.dir(root, p))?;
        }
        Ok(())
    }
}

/// Which partition the open document is curated into, if any.
#[derive(Clone, Debug)]
pub struct CurationState {
    root: PathBuf,
    stem: String,
    partition: Option<Partition>,
    dirs: PartitionDirs,
}

impl CurationState {
    /// Derive the state of `source` from the partition directories next to it.
    /// A stem curated into both partitions is reported, never resolved.
    pub fn detect(source: &Path, dirs: &PartitionDirs) -> Result<Self, ReconciliationError> {
        let root = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = stem_of(source);

        let found: Vec<Partition> = Partition::ALL
            .into_iter()
            .filter(|p| dirs.curated_path(&root, *p, &stem).is_file())
            .collect();
        let partition = match found.as_slice() {
            [] => None,
            [one] => Some(*one),
            _ => return Err(ReconciliationError::BothPartitions { stem, root }),
        };

        Ok(Self {
            root,
            stem,
            partition,
            dirs: dirs.clone(),
        })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition(&self) -> Option<Partition> {
        self.partition
    }

    /// The stored curated file to initialise the working raster from.
    pub fn stored_path(&self) -> Option<PathBuf> {
        self.partition
            .map(|p| self.dirs.curated_path(&self.root, p, &self.stem))
    }

    /// Write `image` into `partition`, then drop the copy in the other one.
    ///
    /// The write is atomic. Nothing is deleted unless it succeeded.
    pub fn commit(&mut self, image: &RgbaImage, partition: Partition) -> Result<PathBuf, WriteError> {
        let target = self.dirs.curated_path(&self.root, partition, &self.stem);
        write_png_atomic(image, &target)?;

        let stale = self
            .dirs
            .curated_path(&self.root, partition.other(), &self.stem);
        match fs::remove_file(&stale) {
            Ok(()) => tracing::debug!(path = %stale.display(), "removed stale curated file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                // the new file is in place; state on disk is now a duplicate
                self.partition = Some(partition);
                return Err(WriteError::RemoveStale { path: stale, source });
            }
        }

        self.partition = Some(partition);
        tracing::info!(stem = %self.stem, partition = partition.label(), "committed");
        Ok(target)
    }
}

/// File stem as a string (lossy for non-UTF-8 names).
pub fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Source images directly under `root`, sorted by path.
pub fn list_sources(root: &Path, settings: &AppSettings) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", glob::Pattern::escape(&root.to_string_lossy()));
    let entries = glob::glob(&pattern).map_err(|e| {
        Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
    })?;

    let mut sources: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|p| p.is_file() && settings.is_source_image(p))
        .collect();
    sources.sort();
    Ok(sources)
}

/// Consistency report between the sources and the two partitions.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Curated stems without a source image.
    pub orphaned: BTreeSet<String>,
    /// Source stems curated into neither partition.
    pub uncurated: BTreeSet<String>,
    /// Stems curated into both partitions.
    pub conflicting: BTreeSet<String>,
}

impl CollectionReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.uncurated.is_empty() && self.conflicting.is_empty()
    }
}

pub fn check_collection(root: &Path, settings: &AppSettings) -> Result<CollectionReport> {
    let dirs = PartitionDirs::from_settings(settings);
    let sources: BTreeSet<String> = list_sources(root, settings)?
        .iter()
        .map(|p| stem_of(p))
        .collect();

    let curated_in = |p: Partition| -> Result<BTreeSet<String>> {
        let dir = dirs.dir(root, p);
        if !dir.is_dir() {
            return Ok(BTreeSet::new());
        }
        let mut stems = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_curated = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(CURATED_EXTENSION));
            if path.is_file() && is_curated {
                stems.insert(stem_of(&path));
            }
        }
        Ok(stems)
    };
    let include = curated_in(Partition::Include)?;
    let exclude = curated_in(Partition::Exclude)?;
    let curated: BTreeSet<String> = include.union(&exclude).cloned().collect();

    Ok(CollectionReport {
        orphaned: curated.difference(&sources).cloned().collect(),
        uncurated: sources.difference(&curated).cloned().collect(),
        conflicting: include.intersection(&exclude).cloned().collect(),
    })
}
