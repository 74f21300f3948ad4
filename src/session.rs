//! Interactive curation session.
//!
//! A [`Session`] owns everything that used to be ambient state: the source
//! list and current index, the open document with its view and curation
//! state, and the active editing mode. Gestures arrive one at a time through
//! [`Session::handle`]; nothing else mutates the working raster.

use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::curation::{CurationState, Partition, PartitionDirs, list_sources};
use crate::error::{Error, Result};
use crate::mask::SelectionMask;
use crate::ops::{MattePredictor, flood_remove, flood_undo, matte_full, matte_remove, matte_undo};
use crate::raster::{PixelRect, RasterDocument};
use crate::settings::AppSettings;
use crate::view::{ScreenPoint, ViewState};

/// Which editing mode is selected, without its transient state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    View,
    Erase,
    Restore,
    FloodRemove,
    FloodUndo,
    MatteRemove,
    MatteUndo,
}

impl ModeKind {
    pub fn label(self) -> &'static str {
        match self {
            ModeKind::View => "View",
            ModeKind::Erase => "Erase",
            ModeKind::Restore => "Restore",
            ModeKind::FloodRemove => "Flood Remove",
            ModeKind::FloodUndo => "Flood Undo",
            ModeKind::MatteRemove => "Matte Remove",
            ModeKind::MatteUndo => "Matte Undo",
        }
    }

    pub fn all() -> &'static [ModeKind] {
        &[
            ModeKind::View,
            ModeKind::Erase,
            ModeKind::Restore,
            ModeKind::FloodRemove,
            ModeKind::FloodUndo,
            ModeKind::MatteRemove,
            ModeKind::MatteUndo,
        ]
    }
}

/// Active mode plus whatever the in-flight gesture needs.
#[derive(Clone, Debug)]
pub enum EditMode {
    View { pan_from: Option<ScreenPoint> },
    Erase { stroke: Option<SelectionMask> },
    Restore { stroke: Option<SelectionMask> },
    FloodRemove,
    FloodUndo,
    MatteRemove { drag_from: Option<ScreenPoint> },
    MatteUndo { drag_from: Option<ScreenPoint> },
}

impl EditMode {
    pub fn new(kind: ModeKind) -> Self {
        match kind {
            ModeKind::View => EditMode::View { pan_from: None },
            ModeKind::Erase => EditMode::Erase { stroke: None },
            ModeKind::Restore => EditMode::Restore { stroke: None },
            ModeKind::FloodRemove => EditMode::FloodRemove,
            ModeKind::FloodUndo => EditMode::FloodUndo,
            ModeKind::MatteRemove => EditMode::MatteRemove { drag_from: None },
            ModeKind::MatteUndo => EditMode::MatteUndo { drag_from: None },
        }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            EditMode::View { .. } => ModeKind::View,
            EditMode::Erase { .. } => ModeKind::Erase,
            EditMode::Restore { .. } => ModeKind::Restore,
            EditMode::FloodRemove => ModeKind::FloodRemove,
            EditMode::FloodUndo => ModeKind::FloodUndo,
            EditMode::MatteRemove { .. } => ModeKind::MatteRemove,
            EditMode::MatteUndo { .. } => ModeKind::MatteUndo,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Primary,
    Middle,
}

/// Pointer input in viewport coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Gesture {
    Press { at: ScreenPoint, button: Button },
    /// Pointer moved (with or without a button held).
    Drag { at: ScreenPoint },
    Release { at: ScreenPoint, button: Button },
    /// Positive notches zoom in.
    Wheel { at: ScreenPoint, notches: i32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureOutcome {
    Ignored,
    /// Gesture state advanced; nothing visible changed yet.
    Pending,
    ViewChanged,
    /// Working raster changed; pixels touched.
    Edited(usize),
}

/// The open document with its view and curation state.
#[derive(Debug)]
pub struct OpenDocument {
    pub path: PathBuf,
    pub raster: RasterDocument,
    pub view: ViewState,
    pub curation: CurationState,
}

/// Result of a batch run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AutoSummary {
    pub processed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct Session {
    settings: AppSettings,
    dirs: PartitionDirs,
    predictor: Arc<dyn MattePredictor>,
    sources: Vec<PathBuf>,
    index: usize,
    current: Option<OpenDocument>,
    mode: EditMode,
    middle_pan: Option<ScreenPoint>,
    background_view: bool,
}

impl Session {
    /// Open the collection at `root` and load its first document.
    ///
    /// An empty collection is an error. A first document that fails to load
    /// is logged and leaves the session without an open document.
    pub fn open(root: &Path, settings: AppSettings, predictor: Arc<dyn MattePredictor>) -> Result<Self> {
        let dirs = PartitionDirs::from_settings(&settings);
        let sources = list_sources(root, &settings)?;
        if sources.is_empty() {
            return Err(Error::NoImages(root.to_path_buf()));
        }
        dirs.ensure(root)?;
        tracing::info!(root = %root.display(), documents = sources.len(), "session opened");

        let mut session = Self {
            settings,
            dirs,
            predictor,
            sources,
            index: 0,
            current: None,
            mode: EditMode::new(ModeKind::View),
            middle_pan: None,
            background_view: false,
        };
        if let Err(e) = session.load_current() {
            tracing::error!(error = %e, "failed to open first document");
        }
        Ok(session)
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn document(&self) -> Option<&OpenDocument> {
        self.current.as_ref()
    }

    /// "3/120"
    pub fn index_label(&self) -> String {
        format!("{}/{}", self.index + 1, self.sources.len())
    }

    pub fn mode(&self) -> ModeKind {
        self.mode.kind()
    }

    /// Switch modes, dropping any half-finished gesture.
    pub fn set_mode(&mut self, kind: ModeKind) {
        self.mode = EditMode::new(kind);
    }

    /// (Re)load the document at the current index from disk.
    ///
    /// The raster pair is replaced wholesale. When a curated copy exists in
    /// exactly one partition the working raster starts from it.
    pub fn load_current(&mut self) -> Result<()> {
        self.current = None;
        self.mode = EditMode::new(self.mode.kind());
        self.middle_pan = None;

        let path = self.sources[self.index].clone();
        let curation = CurationState::detect(&path, &self.dirs)?;
        let mut raster = RasterDocument::load(&path)?;
        if let Some(stored) = curation.stored_path() {
            raster.load_working(&stored)?;
        }
        let view = ViewState::fit(
            raster.dimensions(),
            (self.settings.viewport_width, self.settings.viewport_height),
        );
        tracing::debug!(
            path = %path.display(),
            partition = curation.partition().map(|p| p.label()),
            "document loaded"
        );
        self.current = Some(OpenDocument {
            path,
            raster,
            view,
            curation,
        });
        Ok(())
    }

    /// Jump to `index` (wrapping) and load it.
    pub fn seek(&mut self, index: usize) -> Result<()> {
        self.index = index % self.sources.len();
        self.load_current()
    }

    pub fn next(&mut self) -> Result<()> {
        self.seek(self.index + 1)
    }

    pub fn previous(&mut self) -> Result<()> {
        self.seek(self.index + self.sources.len() - 1)
    }

    pub fn reload(&mut self) -> Result<()> {
        self.load_current()
    }

    /// Discard all edits on the open document.
    pub fn clear(&mut self) {
        if let Some(doc) = self.current.as_mut() {
            doc.raster.reset();
        }
    }

    /// Refit the view to the viewport.
    pub fn fit_view(&mut self) {
        let viewport = (self.settings.viewport_width, self.settings.viewport_height);
        if let Some(doc) = self.current.as_mut() {
            doc.view = ViewState::fit(doc.raster.dimensions(), viewport);
        }
    }

    pub fn toggle_background_view(&mut self) -> bool {
        self.background_view = !self.background_view;
        self.background_view
    }

    /// What the viewport should show for the open document.
    pub fn render(&self) -> Option<RgbaImage> {
        self.current.as_ref().map(|doc| {
            if self.background_view {
                doc.raster.background_preview()
            } else {
                doc.raster.working().clone()
            }
        })
    }

    /// Curate the working raster into `partition`.
    pub fn commit(&mut self, partition: Partition) -> Result<PathBuf> {
        let doc = self.current.as_mut().ok_or(Error::NoDocument)?;
        Ok(doc.curation.commit(doc.raster.working(), partition)?)
    }

    pub fn include(&mut self) -> Result<PathBuf> {
        self.commit(Partition::Include)
    }

    pub fn exclude(&mut self) -> Result<PathBuf> {
        self.commit(Partition::Exclude)
    }

    /// Extract the foreground of the whole open document.
    pub fn matte_whole(&mut self) -> Result<usize> {
        let cutoff = self.settings.foreground_cutoff;
        let doc = self.current.as_mut().ok_or(Error::NoDocument)?;
        Ok(matte_full(&mut doc.raster, self.predictor.as_ref(), cutoff)?)
    }

    /// Feed one pointer gesture through the active mode.
    pub fn handle(&mut self, gesture: Gesture) -> Result<GestureOutcome> {
        let Session {
            settings,
            predictor,
            current,
            mode,
            middle_pan,
            ..
        } = self;
        let Some(doc) = current.as_mut() else {
            return Ok(GestureOutcome::Ignored);
        };

        // Zoom and middle-button panning work the same in every mode.
        match gesture {
            Gesture::Wheel { at, notches } => {
                if notches == 0 {
                    return Ok(GestureOutcome::Ignored);
                }
                doc.view.anchored_zoom(settings.zoom_step.powi(notches), at);
                return Ok(GestureOutcome::ViewChanged);
            }
            Gesture::Press { at, button: Button::Middle } => {
                *middle_pan = Some(at);
                return Ok(GestureOutcome::Pending);
            }
            Gesture::Release { button: Button::Middle, .. } => {
                *middle_pan = None;
                return Ok(GestureOutcome::Ignored);
            }
            Gesture::Drag { at } => {
                if let Some(last) = middle_pan.as_mut() {
                    let (dx, dy) = (at.x - last.x, at.y - last.y);
                    *last = at;
                    doc.view.pan_by(dx, dy);
                    return Ok(GestureOutcome::ViewChanged);
                }
            }
            _ => {}
        }

        let brush = brush_radius(settings.brush_radius, &doc.view);
        let outcome = match (mode, gesture) {
            (EditMode::View { pan_from }, Gesture::Press { at, .. }) => {
                *pan_from = Some(at);
                GestureOutcome::Pending
            }
            (EditMode::View { pan_from: Some(last) }, Gesture::Drag { at }) => {
                let (dx, dy) = (at.x - last.x, at.y - last.y);
                *last = at;
                doc.view.pan_by(dx, dy);
                GestureOutcome::ViewChanged
            }
            (EditMode::View { pan_from }, Gesture::Release { .. }) => {
                *pan_from = None;
                GestureOutcome::Ignored
            }

            (
                EditMode::Erase { stroke } | EditMode::Restore { stroke },
                Gesture::Press { at, .. },
            ) => {
                let mut mask = doc.raster.new_mask();
                stamp(&mut mask, &doc.view, at, brush);
                *stroke = Some(mask);
                GestureOutcome::Pending
            }
            (
                EditMode::Erase { stroke } | EditMode::Restore { stroke },
                Gesture::Drag { at },
            ) => match stroke.as_mut() {
                Some(mask) => {
                    stamp(mask, &doc.view, at, brush);
                    GestureOutcome::Pending
                }
                None => GestureOutcome::Ignored,
            },
            (EditMode::Erase { stroke }, Gesture::Release { .. }) => match stroke.take() {
                Some(mask) => GestureOutcome::Edited(doc.raster.erase(&mask)),
                None => GestureOutcome::Ignored,
            },
            (EditMode::Restore { stroke }, Gesture::Release { .. }) => match stroke.take() {
                Some(mask) => GestureOutcome::Edited(doc.raster.restore(&mask)),
                None => GestureOutcome::Ignored,
            },

            (EditMode::FloodRemove, Gesture::Press { at, .. }) => {
                let seed = doc.view.screen_to_image(at);
                GestureOutcome::Edited(flood_remove(&mut doc.raster, seed, settings.flood_threshold))
            }
            (EditMode::FloodUndo, Gesture::Press { at, .. }) => {
                let seed = doc.view.screen_to_image(at);
                GestureOutcome::Edited(flood_undo(&mut doc.raster, seed, settings.flood_threshold))
            }

            (
                EditMode::MatteRemove { drag_from } | EditMode::MatteUndo { drag_from },
                Gesture::Press { at, .. },
            ) => {
                *drag_from = Some(at);
                GestureOutcome::Pending
            }
            (EditMode::MatteRemove { drag_from }, Gesture::Release { at, .. }) => {
                match drag_from.take() {
                    Some(from) => {
                        let rect = drag_rect(&doc.view, from, at);
                        let n = matte_remove(
                            &mut doc.raster,
                            rect,
                            predictor.as_ref(),
                            settings.foreground_cutoff,
                        )?;
                        GestureOutcome::Edited(n)
                    }
                    None => GestureOutcome::Ignored,
                }
            }
            (EditMode::MatteUndo { drag_from }, Gesture::Release { at, .. }) => {
                match drag_from.take() {
                    Some(from) => {
                        let rect = drag_rect(&doc.view, from, at);
                        let n = matte_undo(
                            &mut doc.raster,
                            rect,
                            predictor.as_ref(),
                            settings.foreground_cutoff,
                        )?;
                        GestureOutcome::Edited(n)
                    }
                    None => GestureOutcome::Ignored,
                }
            }

            _ => GestureOutcome::Ignored,
        };
        Ok(outcome)
    }

    /// Batch-curate every document from the current index onwards: extract
    /// the foreground, commit to Include, advance.
    ///
    /// `cancel` is checked before each document, so a stop request takes
    /// effect after at most the document in progress. Per-document failures
    /// are logged and counted.
    pub fn auto_process(
        &mut self,
        cancel: &AtomicBool,
        mut on_progress: impl FnMut(usize, usize, &Path),
    ) -> AutoSummary {
        let mut summary = AutoSummary::default();
        let total = self.sources.len();

        for i in self.index..total {
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                tracing::info!(at = i, "batch cancelled");
                break;
            }
            on_progress(i, total, &self.sources[i]);

            match self.auto_one(i) {
                Ok(path) => {
                    summary.processed += 1;
                    tracing::debug!(output = %path.display(), "auto-curated");
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(source = %self.sources[i].display(), error = %e, "auto-curation failed");
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        summary
    }

    fn auto_one(&mut self, index: usize) -> Result<PathBuf> {
        self.seek(index)?;
        self.matte_whole()?;
        self.include()
    }
}

/// Brush radius in raster pixels for a radius given in screen pixels.
fn brush_radius(screen_radius: f64, view: &ViewState) -> u32 {
    let r = screen_radius / view.scale();
    if r.is_finite() && r > 0.0 { r as u32 } else { 0 }
}

fn stamp(mask: &mut SelectionMask, view: &ViewState, at: ScreenPoint, radius: u32) {
    let (x, y) = view.screen_to_image_f64(at);
    mask.stamp_disc(x.floor() as i64, y.floor() as i64, radius);
}

/// Raster rectangle between two drag points. Corners may sit on the far
/// edge so a drag across the whole image covers every pixel.
fn drag_rect(view: &ViewState, from: ScreenPoint, to: ScreenPoint) -> PixelRect {
    let (w, h) = view.image_size();
    let corner = |p: ScreenPoint| {
        let (x, y) = view.screen_to_image_f64(p);
        let clamp = |v: f64, max: u32| if v.is_nan() { 0 } else { v.floor().clamp(0.0, max as f64) as u32 };
        (clamp(x, w), clamp(y, h))
    };
    PixelRect::from_corners(corner(from), corner(to), w, h)
}
