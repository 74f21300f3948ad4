//! Pixel operations on a [`RasterDocument`](crate::raster::RasterDocument).

pub mod flood;
pub mod matte;

pub use flood::{flood_region, flood_remove, flood_undo};
pub use matte::{
    CommandPredictor, DEFAULT_FOREGROUND_CUTOFF, FnPredictor, MattePredictor, NoPredictor,
    TimedPredictor, foreground_mask, matte_full, matte_remove, matte_undo,
};
