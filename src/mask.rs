//! Binary selection buffers.
//!
//! A [`SelectionMask`] has the same width and height as the working raster it
//! will be applied to. Brush gestures grow one by stamping discs; flood fills
//! and matte predictions build one in a single pass.

/// Single-channel boolean buffer in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl SelectionMask {
    /// Empty mask (nothing selected).
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.set(x, y);
                }
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Out-of-bounds coordinates read as unselected.
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[self.index(x, y)]
    }

    /// Out-of-bounds coordinates are ignored.
    pub fn set(&mut self, x: u32, y: u32) {
        if x < self.width && y < self.height {
            let idx = self.index(x, y);
            self.bits[idx] = true;
        }
    }

    /// Select every pixel within `radius` of `(cx, cy)`, clipped to bounds.
    /// A radius of zero selects the centre pixel alone. Radii beyond the
    /// mask diagonal behave like the diagonal.
    pub fn stamp_disc(&mut self, cx: i64, cy: i64, radius: u32) {
        let diagonal = (self.width as f64).hypot(self.height as f64) as i64 + 1;
        let r = (radius as i64).min(diagonal);
        let r_sq = r * r;
        let y0 = cy.saturating_sub(r).max(0);
        let y1 = cy.saturating_add(r).min(self.height as i64 - 1);
        let x0 = cx.saturating_sub(r).max(0);
        let x1 = cx.saturating_add(r).min(self.width as i64 - 1);
        for y in y0..=y1 {
            let dy = y - cy;
            for x in x0..=x1 {
                let dx = x - cx;
                if dx * dx + dy * dy <= r_sq {
                    self.set(x as u32, y as u32);
                }
            }
        }
    }

    /// Number of selected pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    /// One row of the mask.
    pub fn row(&self, y: u32) -> &[bool] {
        let start = self.index(0, y);
        &self.bits[start..start + self.width as usize]
    }
}
