//! Base/working raster pair for one document.
//!
//! The base raster is decoded once per load and never written again; every
//! edit lands on the working raster, which always has the base's dimensions.
//! Undo-style operations (restore, flood undo, matte undo) read from the base,
//! so they are exact regardless of how many edits came before.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use std::path::Path;

use crate::error::LoadError;
use crate::io::load_rgba;
use crate::mask::SelectionMask;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Axis-aligned pixel rectangle, `[x, x + width) × [y, y + height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Rectangle spanned by two drag corners in either order, clipped to a
    /// `bounds_w × bounds_h` raster. The far corner is exclusive.
    pub fn from_corners(a: (u32, u32), b: (u32, u32), bounds_w: u32, bounds_h: u32) -> Self {
        let x0 = a.0.min(b.0).min(bounds_w);
        let x1 = a.0.max(b.0).min(bounds_w);
        let y0 = a.1.min(b.1).min(bounds_h);
        let y1 = a.1.max(b.1).min(bounds_h);
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// One open document: immutable base plus mutable working copy.
#[derive(Clone, Debug)]
pub struct RasterDocument {
    base: RgbaImage,
    working: RgbaImage,
}

impl RasterDocument {
    /// Decode `path` into identical base and working rasters.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let base = load_rgba(path)?;
        Ok(Self::from_image(base))
    }

    /// Wrap an already decoded image. Panics on zero dimensions, which
    /// [`load_rgba`] never produces.
    pub fn from_image(base: RgbaImage) -> Self {
        assert!(base.width() > 0 && base.height() > 0, "empty raster");
        let working = base.clone();
        Self { base, working }
    }

    /// Initialise the working raster from a previously stored curated file.
    pub fn load_working(&mut self, path: &Path) -> Result<(), LoadError> {
        let stored = load_rgba(path)?;
        if stored.dimensions() != self.base.dimensions() {
            return Err(LoadError::DimensionMismatch {
                path: path.to_path_buf(),
                expected: self.base.dimensions(),
                actual: stored.dimensions(),
            });
        }
        self.working = stored;
        Ok(())
    }

    pub fn base(&self) -> &RgbaImage {
        &self.base
    }

    pub fn working(&self) -> &RgbaImage {
        &self.working
    }

    pub fn width(&self) -> u32 {
        self.base.width()
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.base.dimensions()
    }

    /// An empty mask sized for this document.
    pub fn new_mask(&self) -> SelectionMask {
        SelectionMask::new(self.width(), self.height())
    }

    /// Discard every edit.
    pub fn reset(&mut self) {
        self.working.clone_from(&self.base);
    }

    /// Clear masked pixels to fully transparent black.
    pub fn erase(&mut self, mask: &SelectionMask) -> usize {
        self.apply_mask(mask, |dst, _| dst.copy_from_slice(&TRANSPARENT.0))
    }

    /// Copy masked pixels back from the base raster.
    pub fn restore(&mut self, mask: &SelectionMask) -> usize {
        self.apply_mask(mask, |dst, src| dst.copy_from_slice(src))
    }

    /// Run `f(working_px, base_px)` on every masked pixel, one row per task.
    /// Returns the number of pixels visited.
    fn apply_mask<F>(&mut self, mask: &SelectionMask, f: F) -> usize
    where
        F: Fn(&mut [u8], &[u8]) + Sync,
    {
        if mask.dimensions() != self.base.dimensions() {
            tracing::warn!(
                mask = ?mask.dimensions(),
                raster = ?self.base.dimensions(),
                "selection mask size does not match raster, ignoring"
            );
            return 0;
        }
        let row_len = self.base.width() as usize * 4;
        let base: &[u8] = &self.base;
        let working: &mut [u8] = &mut self.working;

        working
            .par_chunks_mut(row_len)
            .zip(base.par_chunks(row_len))
            .enumerate()
            .map(|(y, (dst_row, src_row))| {
                let mut touched = 0;
                for (x, &selected) in mask.row(y as u32).iter().enumerate() {
                    if selected {
                        let i = x * 4;
                        f(&mut dst_row[i..i + 4], &src_row[i..i + 4]);
                        touched += 1;
                    }
                }
                touched
            })
            .sum()
    }

    /// Display composite: cleared pixels show the base at half brightness so
    /// the removed background stays visible.
    pub fn background_preview(&self) -> RgbaImage {
        let mut out = self.working.clone();
        for (dst, src) in out.pixels_mut().zip(self.base.pixels()) {
            if dst[3] == 0 {
                *dst = Rgba([src[0] / 2, src[1] / 2, src[2] / 2, 255]);
            }
        }
        out
    }

    /// Bounding rectangle of the non-transparent working pixels.
    pub fn foreground_bounds(&self) -> Option<PixelRect> {
        let mut min = (u32::MAX, u32::MAX);
        let mut max = (0u32, 0u32);
        let mut any = false;
        for (x, y, p) in self.working.enumerate_pixels() {
            if p[3] > 0 {
                any = true;
                min = (min.0.min(x), min.1.min(y));
                max = (max.0.max(x), max.1.max(y));
            }
        }
        any.then(|| PixelRect {
            x: min.0,
            y: min.1,
            width: max.0 - min.0 + 1,
            height: max.1 - min.1 + 1,
        })
    }
}
