use image::{Rgba, RgbaImage};
use std::collections::VecDeque;

use crate::mask::SelectionMask;
use crate::raster::RasterDocument;

/// Fixed-range flood fill:
///
/// BFS over 4-connected neighbours starting at `seed`. A neighbour joins the
/// region when every channel (including alpha) differs from the **seed's**
/// colour by at most `threshold`. The comparison is always against the seed,
/// never against the neighbour that reached it, so the region cannot drift.
///
/// `seed` is clamped into the raster. `threshold = 0` selects only pixels
/// exactly equal to the seed colour.
pub fn flood_region(pixels: &RgbaImage, seed: (u32, u32), threshold: u8) -> SelectionMask {
    let w = pixels.width();
    let h = pixels.height();
    let mut region = SelectionMask::new(w, h);
    if w == 0 || h == 0 {
        return region;
    }

    let start_x = seed.0.min(w - 1);
    let start_y = seed.1.min(h - 1);
    let seed_color = *pixels.get_pixel(start_x, start_y);

    let mut queue = VecDeque::with_capacity(1024);
    region.set(start_x, start_y);
    queue.push_back((start_x, start_y));

    while let Some((px, py)) = queue.pop_front() {
        let neighbors = [
            (px.wrapping_sub(1), py),
            (px + 1, py),
            (px, py.wrapping_sub(1)),
            (px, py + 1),
        ];
        for (nx, ny) in neighbors {
            if nx >= w || ny >= h || region.get(nx, ny) {
                continue;
            }
            if within_range(pixels.get_pixel(nx, ny), &seed_color, threshold) {
                region.set(nx, ny);
                queue.push_back((nx, ny));
            }
        }
    }

    region
}

/// Clear the region grown over the working raster.
pub fn flood_remove(doc: &mut RasterDocument, seed: (u32, u32), threshold: u8) -> usize {
    let region = flood_region(doc.working(), seed, threshold);
    let n = doc.erase(&region);
    tracing::debug!(?seed, threshold, pixels = n, "flood remove");
    n
}

/// Restore the region grown over the base raster.
pub fn flood_undo(doc: &mut RasterDocument, seed: (u32, u32), threshold: u8) -> usize {
    let region = flood_region(doc.base(), seed, threshold);
    let n = doc.restore(&region);
    tracing::debug!(?seed, threshold, pixels = n, "flood undo");
    n
}

/// Max-channel distance test.
#[inline]
fn within_range(pixel: &Rgba<u8>, seed: &Rgba<u8>, threshold: u8) -> bool {
    pixel
        .0
        .iter()
        .zip(seed.0.iter())
        .all(|(&p, &s)| p.abs_diff(s) <= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::TRANSPARENT;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const NEAR_RED: Rgba<u8> = Rgba([250, 3, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    /// Left half red, a near-red column at x = 2, a blue wall at x = 3,
    /// and red again beyond the wall.
    fn striped() -> RgbaImage {
        RgbaImage::from_fn(6, 4, |x, _| match x {
            0 | 1 => RED,
            2 => NEAR_RED,
            3 => BLUE,
            _ => RED,
        })
    }

    #[test]
    fn zero_threshold_takes_exact_matches_only() {
        let region = flood_region(&striped(), (0, 0), 0);
        assert_eq!(region.count(), 8);
        assert!(!region.get(2, 0));
    }

    #[test]
    fn threshold_admits_near_colors_but_not_across_walls() {
        let region = flood_region(&striped(), (0, 0), 5);
        assert_eq!(region.count(), 12);
        assert!(region.get(2, 3));
        assert!(!region.get(4, 0), "region must stay 4-connected");
    }

    #[test]
    fn range_is_fixed_to_the_seed_color() {
        // each step differs from its neighbour by 3, but the far end is 15 away
        let ramp = RgbaImage::from_fn(6, 1, |x, _| Rgba([100 + 3 * x as u8, 0, 0, 255]));
        let region = flood_region(&ramp, (0, 0), 6);
        assert_eq!(region.count(), 3);
    }

    #[test]
    fn seed_outside_bounds_is_clamped() {
        let region = flood_region(&striped(), (100, 100), 0);
        assert!(region.get(5, 3));
        assert_eq!(region.count(), 8);
    }

    #[test]
    fn remove_then_undo_brings_the_region_back() {
        let mut doc = RasterDocument::from_image(striped());
        assert_eq!(flood_remove(&mut doc, (1, 1), 0), 8);
        assert_eq!(*doc.working().get_pixel(0, 0), TRANSPARENT);
        assert_eq!(*doc.working().get_pixel(2, 0), NEAR_RED);

        // undo grows over the untouched base, so the cleared pixels come back
        flood_undo(&mut doc, (1, 1), 0);
        assert_eq!(doc.working(), doc.base());
    }

    #[test]
    fn remove_with_zero_threshold_leaves_other_colors_alone() {
        let mut doc = RasterDocument::from_image(striped());
        flood_remove(&mut doc, (0, 0), 0);
        for (x, y, p) in doc.working().enumerate_pixels() {
            let original = doc.base().get_pixel(x, y);
            if *original != RED || x > 3 {
                assert_eq!(p, original, "({x},{y}) changed");
            }
        }
    }
}
