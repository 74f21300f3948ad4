use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use image::{GrayImage, Luma, Rgba, RgbaImage};
use maskcurator::curation::check_collection;
use maskcurator::ops::{FnPredictor, MattePredictor, TimedPredictor};
use maskcurator::{
    AppSettings, Button, Gesture, GestureOutcome, ModeKind, Partition, PredictorError, ScreenPoint,
    Session,
};
use tempfile::TempDir;

// 8x8 sources: a bright 4x4 square on a dark background
fn square_image() -> RgbaImage {
    RgbaImage::from_fn(8, 8, |x, y| {
        if (2..6).contains(&x) && (2..6).contains(&y) {
            Rgba([240, 200, 40, 255])
        } else {
            Rgba([10, 10, 10, 255])
        }
    })
}

fn create_collection(names: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in names {
        square_image().save(dir.path().join(name)).unwrap();
    }
    dir
}

fn bright_predictor() -> Arc<dyn MattePredictor> {
    Arc::new(FnPredictor(|region: &RgbaImage| {
        Ok::<_, PredictorError>(GrayImage::from_fn(region.width(), region.height(), |x, y| {
            Luma([if region.get_pixel(x, y)[0] > 128 { 255 } else { 0 }])
        }))
    }))
}

// viewport twice the image size: scale 2, origin at 0
fn test_settings() -> AppSettings {
    AppSettings {
        viewport_width: 16,
        viewport_height: 16,
        brush_radius: 0.0,
        ..AppSettings::default()
    }
}

fn curated(root: &Path, partition: &str, stem: &str) -> bool {
    root.join(partition).join(format!("{stem}.png")).is_file()
}

#[test]
fn test_erase_after_zoom_hits_the_pixel_under_the_cursor() {
    let dir = create_collection(&["one.png"]);
    let mut session = Session::open(dir.path(), test_settings(), bright_predictor()).unwrap();

    // zoom in around a point, then erase exactly there
    let cursor = ScreenPoint::new(7.0, 9.0);
    session
        .handle(Gesture::Wheel { at: cursor, notches: 3 })
        .unwrap();
    let under = session.document().unwrap().view.screen_to_image(cursor);
    assert_eq!(under, (3, 4));

    session.set_mode(ModeKind::Erase);
    session
        .handle(Gesture::Press { at: cursor, button: Button::Primary })
        .unwrap();
    let outcome = session
        .handle(Gesture::Release { at: cursor, button: Button::Primary })
        .unwrap();
    assert_eq!(outcome, GestureOutcome::Edited(1));

    let working = session.document().unwrap().raster.working();
    assert_eq!(working.get_pixel(3, 4)[3], 0);
    assert_eq!(working.get_pixel(2, 4)[3], 255);
}

#[test]
fn test_matte_undo_brings_back_only_the_foreground() {
    let dir = create_collection(&["one.png"]);
    let mut session = Session::open(dir.path(), test_settings(), bright_predictor()).unwrap();

    // wipe everything, then drag a matte-undo over the whole image
    session.set_mode(ModeKind::FloodRemove);
    session
        .handle(Gesture::Press { at: ScreenPoint::new(1.0, 1.0), button: Button::Primary })
        .unwrap();
    session
        .handle(Gesture::Press { at: ScreenPoint::new(8.0, 8.0), button: Button::Primary })
        .unwrap();
    let bounds = session.document().unwrap().raster.foreground_bounds();
    assert_eq!(bounds, None);

    session.set_mode(ModeKind::MatteUndo);
    session
        .handle(Gesture::Press { at: ScreenPoint::new(16.0, 16.0), button: Button::Primary })
        .unwrap();
    let outcome = session
        .handle(Gesture::Release { at: ScreenPoint::new(0.0, 0.0), button: Button::Primary })
        .unwrap();
    assert_eq!(outcome, GestureOutcome::Edited(16));

    let bounds = session.document().unwrap().raster.foreground_bounds().unwrap();
    assert_eq!((bounds.x, bounds.y, bounds.width, bounds.height), (2, 2, 4, 4));
}

#[test]
fn test_commit_moves_between_partitions() {
    let dir = create_collection(&["cat.png"]);
    let mut session = Session::open(dir.path(), test_settings(), bright_predictor()).unwrap();

    session.include().unwrap();
    assert!(curated(dir.path(), "include", "cat"));

    session.commit(Partition::Exclude).unwrap();
    assert!(!curated(dir.path(), "include", "cat"));
    assert!(curated(dir.path(), "exclude", "cat"));
}

#[test]
fn test_batch_leaves_a_consistent_collection() {
    let dir = create_collection(&["a.png", "b.png", "c.png"]);
    let mut session = Session::open(dir.path(), test_settings(), bright_predictor()).unwrap();

    let before = check_collection(dir.path(), session.settings()).unwrap();
    assert_eq!(before.uncurated.len(), 3);

    let summary = session.auto_process(&AtomicBool::new(false), |_, _, _| {});
    assert_eq!(summary.processed, 3);

    let after = check_collection(dir.path(), session.settings()).unwrap();
    assert!(after.is_clean());

    let stored = image::open(dir.path().join("include/b.png")).unwrap().to_rgba8();
    assert_eq!(stored.get_pixel(0, 0)[3], 0);
    assert_eq!(stored.get_pixel(3, 3)[3], 255);
}

#[test]
fn test_batch_stops_between_documents() {
    let dir = create_collection(&["a.png", "b.png", "c.png"]);
    let mut session = Session::open(dir.path(), test_settings(), bright_predictor()).unwrap();

    let cancel = AtomicBool::new(false);
    let summary = session.auto_process(&cancel, |i, _, _| {
        // request a stop while the second document is in progress
        if i == 1 {
            cancel.store(true, Ordering::Relaxed);
        }
    });

    assert!(summary.cancelled);
    assert_eq!(summary.processed, 2);
    assert!(curated(dir.path(), "include", "b"));
    assert!(!curated(dir.path(), "include", "c"));
}

#[test]
fn test_slow_predictor_is_bounded_and_leaves_the_image_alone() {
    let dir = create_collection(&["one.png"]);
    let slow = FnPredictor(|region: &RgbaImage| {
        std::thread::sleep(Duration::from_millis(500));
        Ok::<_, PredictorError>(GrayImage::new(region.width(), region.height()))
    });
    let predictor = Arc::new(TimedPredictor::new(slow, Duration::from_millis(50)));
    let mut session = Session::open(dir.path(), test_settings(), predictor).unwrap();

    session.set_mode(ModeKind::MatteRemove);
    session
        .handle(Gesture::Press { at: ScreenPoint::new(0.0, 0.0), button: Button::Primary })
        .unwrap();
    let err = session
        .handle(Gesture::Release { at: ScreenPoint::new(16.0, 16.0), button: Button::Primary })
        .unwrap_err();
    assert!(matches!(err, maskcurator::Error::Predictor(PredictorError::Timeout(_))));

    let doc = session.document().unwrap();
    assert_eq!(doc.raster.working(), doc.raster.base());
}

#[test]
fn test_timed_predictor_passes_fast_results_through() {
    let dir = create_collection(&["one.png"]);
    let predictor = Arc::new(TimedPredictor::new(bright_predictor(), Duration::from_secs(5)));
    let mut session = Session::open(dir.path(), test_settings(), predictor).unwrap();

    assert_eq!(session.matte_whole().unwrap(), 48);
}
