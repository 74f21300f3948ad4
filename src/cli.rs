// ============================================================================
// MaskCurator CLI: headless curation via command-line subcommands
// ============================================================================
//
// Usage examples:
//   MaskCurator auto photos/                     (matte + include every image)
//   MaskCurator auto photos/ --start 40          (resume from the 40th image)
//   MaskCurator watch photos/                    (mirror moves until stdin closes)
//   MaskCurator check photos/                    (exit 1 on orphaned/uncurated)
//   MaskCurator commit photos/ cat.jpg exclude --matte
//
// Everything runs on the current thread except the watcher's consumer.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::curation::{CollectionReport, CurationState, Partition, PartitionDirs, check_collection};
use crate::error::{Error, Result};
use crate::ops::matte_full;
use crate::raster::RasterDocument;
use crate::session::Session;
use crate::settings::AppSettings;
use crate::watcher::{Reconciled, Report, WatcherHandle};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Curate an image collection into include/exclude partitions.
#[derive(Parser, Debug)]
#[command(name = "MaskCurator", version, about = "Headless image curation and partition maintenance")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file to use instead of the per-user one.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level and print per-file timing.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract the foreground of every remaining image and include it.
    Auto {
        root: PathBuf,
        /// 1-based position to start from.
        #[arg(long, default_value_t = 1, value_name = "N")]
        start: usize,
    },
    /// Keep partition files next to their sources while another tool moves them.
    Watch { root: PathBuf },
    /// Report orphaned, uncurated and conflicting files.
    Check { root: PathBuf },
    /// Curate one image without opening a session.
    Commit {
        root: PathBuf,
        /// Source image, absolute or relative to ROOT.
        image: PathBuf,
        /// `include` or `exclude`.
        partition: Partition,
        /// Replace the working raster with a full-image matte first.
        #[arg(long)]
        matte: bool,
    },
}

impl CliArgs {
    /// Settings from `--config` or the default location, with env overrides.
    pub fn load_settings(&self) -> AppSettings {
        match &self.config {
            Some(path) => {
                let mut settings = AppSettings::load_from(path);
                settings.apply_env_overrides();
                settings
            }
            None => AppSettings::load(),
        }
    }

    pub fn log_level<'a>(&self, settings: &'a AppSettings) -> &'a str {
        if self.verbose { "debug" } else { &settings.log_level }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one subcommand and return an OS exit code.
pub fn run(args: CliArgs, settings: AppSettings) -> ExitCode {
    let verbose = args.verbose;
    let outcome = match args.command {
        Command::Auto { root, start } => run_auto(&root, start, settings, verbose),
        Command::Watch { root } => run_watch(&root, &settings),
        Command::Check { root } => run_check(&root, &settings),
        Command::Commit {
            root,
            image,
            partition,
            matte,
        } => run_commit(&root, &image, partition, matte, &settings),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            if let Some(log) = crate::logger::log_path() {
                eprintln!("session log: {}", log.display());
            }
            ExitCode::FAILURE
        }
    }
}

fn run_auto(root: &Path, start: usize, settings: AppSettings, verbose: bool) -> Result<ExitCode> {
    let predictor = settings.predictor();
    let mut session = Session::open(root, settings, predictor)?;
    let first = start_index(start, session.len())?;
    if first > 0 {
        // a failed load here is retried (and counted) by the batch itself
        if let Err(e) = session.seek(first) {
            tracing::warn!(error = %e, "could not load start document");
        }
    }

    let cancel = AtomicBool::new(false);
    let mut file_start = Instant::now();
    let summary = session.auto_process(&cancel, |i, total, path| {
        if verbose && i > 0 {
            println!("  ({:.0}ms)", file_start.elapsed().as_secs_f64() * 1000.0);
        }
        file_start = Instant::now();
        println!("[{}/{}] {}", i + 1, total, path.display());
    });

    println!(
        "{} processed, {} failed{}",
        summary.processed,
        summary.failed,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(if summary.failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// 0-based index for a 1-based `--start`, which must name an existing image.
fn start_index(start: usize, len: usize) -> Result<usize> {
    if start == 0 || start > len {
        return Err(Error::StartOutOfRange { start, len });
    }
    Ok(start - 1)
}

fn run_watch(root: &Path, settings: &AppSettings) -> Result<ExitCode> {
    if !root.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )));
    }
    let (report_tx, report_rx) = crossbeam::channel::unbounded::<Report>();
    let watcher = WatcherHandle::start(root, settings, Some(report_tx))?;

    let printer = thread::Builder::new()
        .name("maskcurator-reports".to_string())
        .spawn(move || {
            for report in report_rx {
                print_report(&report);
            }
        })?;

    println!("watching {} (close stdin to stop)", root.display());
    for line in std::io::stdin().lock().lines() {
        if line.is_err() {
            break;
        }
    }

    // dropping the consumer's sender ends the printer
    watcher.shutdown();
    let _ = printer.join();
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &Report) {
    match &report.result {
        Ok(Reconciled::Moved { partition, from, to }) => {
            println!("moved  {} -> {} ({})", from.display(), to.display(), partition.label());
        }
        Ok(Reconciled::NewFile { path }) => println!("new    {}", path.display()),
        Ok(_) => {}
        Err(e) => eprintln!("error: {e}"),
    }
}

fn run_check(root: &Path, settings: &AppSettings) -> Result<ExitCode> {
    let report = check_collection(root, settings)?;
    print_check(&report);
    Ok(if report.is_clean() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_check(report: &CollectionReport) {
    let sections = [
        ("orphaned (curated, no source)", &report.orphaned),
        ("uncurated", &report.uncurated),
        ("in both partitions", &report.conflicting),
    ];
    for (title, stems) in sections {
        if stems.is_empty() {
            continue;
        }
        println!("{title}: {}", stems.len());
        for stem in stems {
            println!("  {stem}");
        }
    }
    if report.is_clean() {
        println!("collection is consistent");
    }
}

fn run_commit(
    root: &Path,
    image: &Path,
    partition: Partition,
    matte: bool,
    settings: &AppSettings,
) -> Result<ExitCode> {
    let source = if image.is_absolute() { image.to_path_buf() } else { root.join(image) };
    let dirs = PartitionDirs::from_settings(settings);

    let mut state = CurationState::detect(&source, &dirs)?;
    let mut raster = RasterDocument::load(&source)?;
    if matte {
        matte_full(&mut raster, settings.predictor().as_ref(), settings.foreground_cutoff)?;
    } else if let Some(stored) = state.stored_path() {
        raster.load_working(&stored)?;
    }

    let written = state.commit(raster.working(), partition)?;
    println!("{}", written.display());
    Ok(ExitCode::SUCCESS)
}
