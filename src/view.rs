//! Viewport ↔ raster coordinate mapping.

/// A point in viewport (screen) space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Scale plus the screen position of the raster's top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    scale: f64,
    origin: ScreenPoint,
    image_size: (u32, u32),
}

impl ViewState {
    /// Largest scale at which the whole raster fits the viewport, centred.
    pub fn fit(raster_size: (u32, u32), viewport_size: (u32, u32)) -> Self {
        let (img_w, img_h) = (raster_size.0.max(1) as f64, raster_size.1.max(1) as f64);
        let (vp_w, vp_h) = (viewport_size.0 as f64, viewport_size.1 as f64);
        let mut scale = (vp_w / img_w).min(vp_h / img_h);
        if !(scale.is_finite() && scale > 0.0) {
            scale = 1.0;
        }
        let origin = ScreenPoint::new(
            (vp_w - img_w * scale) / 2.0,
            (vp_h - img_h * scale) / 2.0,
        );
        Self {
            scale,
            origin,
            image_size: (raster_size.0.max(1), raster_size.1.max(1)),
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn origin(&self) -> ScreenPoint {
        self.origin
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.image_size
    }

    /// Multiply the scale by `factor` while keeping the raster coordinate
    /// under `anchor` fixed. Non-positive or non-finite factors are ignored.
    pub fn anchored_zoom(&mut self, factor: f64, anchor: ScreenPoint) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let new_scale = self.scale * factor;
        if !(new_scale.is_finite() && new_scale > 0.0) {
            return;
        }
        self.origin.x -= (anchor.x - self.origin.x) * (factor - 1.0);
        self.origin.y -= (anchor.y - self.origin.y) * (factor - 1.0);
        self.scale = new_scale;
    }

    /// Pan the raster by a screen-space delta.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.origin.x += dx;
        self.origin.y += dy;
    }

    /// Raster pixel under `p`, clamped into the raster.
    pub fn screen_to_image(&self, p: ScreenPoint) -> (u32, u32) {
        let clamp = |v: f64, dim: u32| -> u32 {
            let max = (dim - 1) as f64;
            if v.is_nan() { 0 } else { v.floor().clamp(0.0, max) as u32 }
        };
        (
            clamp((p.x - self.origin.x) / self.scale, self.image_size.0),
            clamp((p.y - self.origin.y) / self.scale, self.image_size.1),
        )
    }

    /// Unclamped raster position under `p`, for hit tests outside the image.
    pub fn screen_to_image_f64(&self, p: ScreenPoint) -> (f64, f64) {
        (
            (p.x - self.origin.x) / self.scale,
            (p.y - self.origin.y) / self.scale,
        )
    }

    /// Screen position of the top-left corner of raster pixel `q`.
    pub fn image_to_screen(&self, q: (u32, u32)) -> ScreenPoint {
        ScreenPoint::new(
            self.origin.x + q.0 as f64 * self.scale,
            self.origin.y + q.1 as f64 * self.scale,
        )
    }
}
