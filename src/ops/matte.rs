// ============================================================================
// MATTE OPERATIONS: foreground extraction through an external predictor
// ============================================================================
//
// The matting model itself is opaque: anything implementing `MattePredictor`
// turns an RGBA region into an alpha matte of the same size. Pixels whose
// predicted alpha reaches the cutoff count as foreground.
//
// Every operation calls the predictor before touching the raster, so a failed
// or timed-out prediction leaves the working raster exactly as it was.

use image::{DynamicImage, GrayImage, RgbaImage};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::PredictorError;
use crate::mask::SelectionMask;
use crate::raster::{PixelRect, RasterDocument};

/// Predicted alpha at or above this value is foreground.
pub const DEFAULT_FOREGROUND_CUTOFF: u8 = 150;

/// Estimates a foreground alpha matte for an image region.
pub trait MattePredictor: Send + Sync {
    /// Returns a single-channel matte with exactly the region's dimensions.
    fn predict(&self, region: &RgbaImage) -> Result<GrayImage, PredictorError>;

    fn name(&self) -> &str {
        "predictor"
    }
}

impl<P: MattePredictor + ?Sized> MattePredictor for Arc<P> {
    fn predict(&self, region: &RgbaImage) -> Result<GrayImage, PredictorError> {
        (**self).predict(region)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Stand-in used when no predictor is configured. Always fails.
#[derive(Debug, Default)]
pub struct NoPredictor;

impl MattePredictor for NoPredictor {
    fn predict(&self, _region: &RgbaImage) -> Result<GrayImage, PredictorError> {
        Err(PredictorError::Unavailable(
            "no predictor program configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// In-process predictor backed by a closure.
pub struct FnPredictor<F>(pub F);

impl<F> MattePredictor for FnPredictor<F>
where
    F: Fn(&RgbaImage) -> Result<GrayImage, PredictorError> + Send + Sync,
{
    fn predict(&self, region: &RgbaImage) -> Result<GrayImage, PredictorError> {
        (self.0)(region)
    }

    fn name(&self) -> &str {
        "in-process"
    }
}

/// Runs an external program (e.g. `rembg i {input} {output}`) on a PNG of the
/// region and reads the matte back from the PNG it writes.
#[derive(Clone, Debug)]
pub struct CommandPredictor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPredictor {
    /// `args` may contain the `{input}` and `{output}` placeholders; when
    /// neither appears, the two paths are appended in that order.
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        let has_placeholder = self
            .args
            .iter()
            .any(|a| a.contains("{input}") || a.contains("{output}"));
        let mut rendered: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect();
        if !has_placeholder {
            rendered.push(input.into_owned());
            rendered.push(output.into_owned());
        }
        rendered
    }
}

impl MattePredictor for CommandPredictor {
    fn predict(&self, region: &RgbaImage) -> Result<GrayImage, PredictorError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("region.png");
        let output = scratch.path().join("matte.png");
        region
            .save(&input)
            .map_err(|e| PredictorError::Failed(format!("could not stage region: {e}")))?;

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(self.render_args(&input, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PredictorError::Unavailable(format!("{}: {e}", self.program)))?;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PredictorError::Timeout(self.timeout));
            }
            thread::sleep(Duration::from_millis(20));
        };
        if !status.success() {
            return Err(PredictorError::Failed(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        tracing::debug!(
            program = %self.program,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "predictor finished"
        );

        let decoded = image::open(&output)
            .map_err(|e| PredictorError::InvalidOutput(format!("{}: {e}", output.display())))?;
        Ok(alpha_of(decoded))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Bounds an in-process predictor by running each call on a helper thread.
/// A call that overruns is abandoned; its result is discarded when it lands.
pub struct TimedPredictor<P> {
    inner: Arc<P>,
    timeout: Duration,
}

impl<P: MattePredictor + 'static> TimedPredictor<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }
}

impl<P: MattePredictor + 'static> MattePredictor for TimedPredictor<P> {
    fn predict(&self, region: &RgbaImage) -> Result<GrayImage, PredictorError> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let region = region.clone();
        thread::Builder::new()
            .name("matte-predict".to_string())
            .spawn(move || {
                let _ = tx.send(inner.predict(&region));
            })?;
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                Err(PredictorError::Timeout(self.timeout))
            }
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => Err(
                PredictorError::Failed("predictor thread panicked".to_string()),
            ),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Alpha channel of the predictor output, or its luminance when it has none.
fn alpha_of(img: DynamicImage) -> GrayImage {
    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            image::Luma([rgba.get_pixel(x, y)[3]])
        })
    } else {
        img.to_luma8()
    }
}

/// Run the predictor on `region` and threshold the matte at `cutoff`.
pub fn foreground_mask(
    predictor: &dyn MattePredictor,
    region: &RgbaImage,
    cutoff: u8,
) -> Result<SelectionMask, PredictorError> {
    let matte = predictor.predict(region)?;
    if matte.dimensions() != region.dimensions() {
        return Err(PredictorError::InvalidOutput(format!(
            "{} returned a {:?} matte for a {:?} region",
            predictor.name(),
            matte.dimensions(),
            region.dimensions()
        )));
    }
    Ok(SelectionMask::from_fn(region.width(), region.height(), |x, y| {
        matte.get_pixel(x, y)[0] >= cutoff
    }))
}

fn clip(rect: PixelRect, doc: &RasterDocument) -> PixelRect {
    PixelRect::from_corners(
        (rect.x, rect.y),
        (
            rect.x.saturating_add(rect.width),
            rect.y.saturating_add(rect.height),
        ),
        doc.width(),
        doc.height(),
    )
}

/// Predict over `rect` of the working raster and clear everything inside
/// `rect` that is not foreground. Pixels outside `rect` are untouched.
/// Returns the number of pixels cleared.
pub fn matte_remove(
    doc: &mut RasterDocument,
    rect: PixelRect,
    predictor: &dyn MattePredictor,
    cutoff: u8,
) -> Result<usize, PredictorError> {
    let rect = clip(rect, doc);
    if rect.is_empty() {
        return Ok(0);
    }
    let crop = image::imageops::crop_imm(doc.working(), rect.x, rect.y, rect.width, rect.height)
        .to_image();
    let fg = foreground_mask(predictor, &crop, cutoff)?;

    let background = SelectionMask::from_fn(doc.width(), doc.height(), |x, y| {
        rect.contains(x, y) && !fg.get(x - rect.x, y - rect.y)
    });
    let n = doc.erase(&background);
    tracing::debug!(?rect, cleared = n, "matte remove");
    Ok(n)
}

/// Predict over `rect` of the base raster and copy the foreground back into
/// the working raster. Background pixels are left as they are, never cleared.
/// Returns the number of pixels restored.
pub fn matte_undo(
    doc: &mut RasterDocument,
    rect: PixelRect,
    predictor: &dyn MattePredictor,
    cutoff: u8,
) -> Result<usize, PredictorError> {
    let rect = clip(rect, doc);
    if rect.is_empty() {
        return Ok(0);
    }
    let crop =
        image::imageops::crop_imm(doc.base(), rect.x, rect.y, rect.width, rect.height).to_image();
    let fg = foreground_mask(predictor, &crop, cutoff)?;

    let foreground = SelectionMask::from_fn(doc.width(), doc.height(), |x, y| {
        rect.contains(x, y) && fg.get(x - rect.x, y - rect.y)
    });
    let n = doc.restore(&foreground);
    tracing::debug!(?rect, restored = n, "matte undo");
    Ok(n)
}

/// Whole-image extraction used by batch processing: the working raster
/// becomes the base where the matte is foreground and transparent elsewhere.
pub fn matte_full(
    doc: &mut RasterDocument,
    predictor: &dyn MattePredictor,
    cutoff: u8,
) -> Result<usize, PredictorError> {
    let fg = foreground_mask(predictor, doc.base(), cutoff)?;
    doc.reset();
    let background =
        SelectionMask::from_fn(doc.width(), doc.height(), |x, y| !fg.get(x, y));
    Ok(doc.erase(&background))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::TRANSPARENT;
    use image::{Luma, Rgba};

    /// Foreground wherever the red channel is above 128.
    fn red_is_foreground() -> FnPredictor<impl Fn(&RgbaImage) -> Result<GrayImage, PredictorError>> {
        FnPredictor(|region: &RgbaImage| {
            Ok::<_, PredictorError>(GrayImage::from_fn(region.width(), region.height(), |x, y| {
                Luma([if region.get_pixel(x, y)[0] > 128 { 255 } else { 0 }])
            }))
        })
    }

    /// Red square in the middle of a green field.
    fn subject() -> RgbaImage {
        RgbaImage::from_fn(8, 8, |x, y| {
            if (2..6).contains(&x) && (2..6).contains(&y) {
                Rgba([220, 10, 10, 255])
            } else {
                Rgba([10, 200, 10, 255])
            }
        })
    }

    fn whole(doc: &RasterDocument) -> PixelRect {
        PixelRect { x: 0, y: 0, width: doc.width(), height: doc.height() }
    }

    #[test]
    fn remove_clears_background_inside_the_rect_only() {
        let mut doc = RasterDocument::from_image(subject());
        let rect = PixelRect { x: 0, y: 0, width: 4, height: 8 };
        let n = matte_remove(&mut doc, rect, &red_is_foreground(), DEFAULT_FOREGROUND_CUTOFF).unwrap();

        assert_eq!(n, 4 * 8 - 2 * 4);
        assert_eq!(*doc.working().get_pixel(0, 0), TRANSPARENT);
        assert_eq!(doc.working().get_pixel(3, 3), doc.base().get_pixel(3, 3));
        assert_eq!(doc.working().get_pixel(7, 7), doc.base().get_pixel(7, 7));
    }

    #[test]
    fn empty_rect_is_a_no_op_and_skips_the_predictor() {
        let mut doc = RasterDocument::from_image(subject());
        let rect = PixelRect { x: 3, y: 3, width: 0, height: 5 };
        assert_eq!(matte_remove(&mut doc, rect, &NoPredictor, 150).unwrap(), 0);
        assert_eq!(doc.working(), doc.base());
    }

    #[test]
    fn predictor_failure_leaves_the_raster_unchanged() {
        let mut doc = RasterDocument::from_image(subject());
        let mut mask = doc.new_mask();
        mask.stamp_disc(0, 0, 2);
        doc.erase(&mask);
        let before = doc.working().clone();

        let rect = whole(&doc);
        assert!(matte_remove(&mut doc, rect, &NoPredictor, 150).is_err());
        assert!(matte_undo(&mut doc, rect, &NoPredictor, 150).is_err());
        assert_eq!(*doc.working(), before);
    }

    #[test]
    fn wrong_sized_matte_is_rejected() {
        let mut doc = RasterDocument::from_image(subject());
        let tiny = FnPredictor(|_: &RgbaImage| Ok::<_, PredictorError>(GrayImage::new(1, 1)));
        let rect = whole(&doc);
        let err = matte_remove(&mut doc, rect, &tiny, 150).unwrap_err();
        assert!(matches!(err, PredictorError::InvalidOutput(_)));
        assert_eq!(doc.working(), doc.base());
    }

    #[test]
    fn undo_is_idempotent_and_not_the_inverse_of_remove() {
        let mut doc = RasterDocument::from_image(subject());
        let all = SelectionMask::from_fn(8, 8, |_, _| true);
        doc.erase(&all);
        let rect = whole(&doc);
        let p = red_is_foreground();

        matte_undo(&mut doc, rect, &p, 150).unwrap();
        let once = doc.working().clone();
        matte_undo(&mut doc, rect, &p, 150).unwrap();
        assert_eq!(*doc.working(), once);

        // the background that was erased stays erased
        assert_eq!(*doc.working().get_pixel(0, 0), TRANSPARENT);
        assert_eq!(doc.working().get_pixel(2, 2), doc.base().get_pixel(2, 2));

        let mut fresh = RasterDocument::from_image(subject());
        matte_remove(&mut fresh, rect, &p, 150).unwrap();
        matte_undo(&mut fresh, rect, &p, 150).unwrap();
        assert_ne!(fresh.working(), fresh.base());
    }

    #[test]
    fn cutoff_is_inclusive() {
        let mut doc = RasterDocument::from_image(subject());
        let flat = FnPredictor(|r: &RgbaImage| {
            Ok::<_, PredictorError>(GrayImage::from_pixel(r.width(), r.height(), Luma([150])))
        });
        let rect = whole(&doc);
        assert_eq!(matte_remove(&mut doc, rect, &flat, 150).unwrap(), 0);
        assert_eq!(matte_remove(&mut doc, rect, &flat, 151).unwrap(), 64);
    }

    #[test]
    fn full_matte_keeps_only_the_subject() {
        let mut doc = RasterDocument::from_image(subject());
        matte_full(&mut doc, &red_is_foreground(), 150).unwrap();
        assert_eq!(doc.foreground_bounds(), Some(PixelRect { x: 2, y: 2, width: 4, height: 4 }));
    }

    #[test]
    fn timed_predictor_gives_up() {
        let slow = FnPredictor(|r: &RgbaImage| {
            thread::sleep(Duration::from_millis(500));
            Ok::<_, PredictorError>(GrayImage::new(r.width(), r.height()))
        });
        let timed = TimedPredictor::new(slow, Duration::from_millis(20));
        let err = timed.predict(&subject()).unwrap_err();
        assert!(matches!(err, PredictorError::Timeout(_)));
    }

    #[test]
    fn command_args_get_paths_substituted_or_appended() {
        let p = CommandPredictor::new("rembg", vec!["i".into(), "{input}".into(), "{output}".into()], Duration::from_secs(1));
        assert_eq!(
            p.render_args(Path::new("/t/in.png"), Path::new("/t/out.png")),
            vec!["i", "/t/in.png", "/t/out.png"]
        );
        let bare = CommandPredictor::new("matte", vec!["--fast".into()], Duration::from_secs(1));
        assert_eq!(
            bare.render_args(Path::new("a"), Path::new("b")),
            vec!["--fast", "a", "b"]
        );
    }

    #[test]
    fn missing_program_is_unavailable() {
        let p = CommandPredictor::new("/definitely/not/a/matting/tool", vec![], Duration::from_secs(1));
        let err = p.predict(&subject()).unwrap_err();
        assert!(matches!(err, PredictorError::Unavailable(_)));
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout: Duration) -> CommandPredictor {
        CommandPredictor::new(
            "sh",
            vec!["-c".into(), script.into(), "{input}".into(), "{output}".into()],
            timeout,
        )
    }

    #[cfg(unix)]
    #[test]
    fn slow_program_is_killed_at_the_timeout() {
        let p = sh("exec sleep 5", Duration::from_millis(100));
        let started = Instant::now();
        let err = p.predict(&subject()).unwrap_err();
        assert!(matches!(err, PredictorError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_failure() {
        let p = CommandPredictor::new("false", vec![], Duration::from_secs(5));
        let err = p.predict(&subject()).unwrap_err();
        assert!(matches!(err, PredictorError::Failed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn program_without_output_is_invalid() {
        let p = sh("exit 0", Duration::from_secs(5));
        let err = p.predict(&subject()).unwrap_err();
        assert!(matches!(err, PredictorError::InvalidOutput(_)));
    }

    #[cfg(unix)]
    #[test]
    fn alpha_of_the_written_png_becomes_the_matte() {
        // echo the region back: opaque everywhere
        let p = sh(r#"cp "$0" "$1""#, Duration::from_secs(5));
        let matte = p.predict(&subject()).unwrap();
        assert_eq!(matte.dimensions(), (8, 8));
        assert!(matte.pixels().all(|px| px[0] == 255));
    }
}
