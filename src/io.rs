use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{LoadError, WriteError};

/// Curated output is always written as PNG regardless of the source format.
pub const CURATED_EXTENSION: &str = "png";

/// Decode any supported raster into 8-bit RGBA.
///
/// Sources without an alpha channel get a fully opaque one. Zero-sized images
/// are rejected so every downstream buffer has at least one pixel.
pub fn load_rgba(path: &Path) -> Result<RgbaImage, LoadError> {
    let decoded = image::open(path).map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    // to_rgba8 fills alpha with 255 when the source has none
    let img = decoded.to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(LoadError::ZeroDimensions {
            path: path.to_path_buf(),
        });
    }
    Ok(img)
}

/// Encode `image` as PNG and atomically place it at `path`.
///
/// The bytes go to a temp file in the destination directory first and are
/// renamed over `path` only once the encoder has finished, so a failure at any
/// point leaves the previous file (or no file) in place.
pub fn write_png_atomic(image: &RgbaImage, path: &Path) -> Result<(), WriteError> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|source| WriteError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut temp = tempfile::Builder::new()
        .prefix(".curating-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|source| WriteError::TempFile {
            dir: dir.to_path_buf(),
            source,
        })?;

    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        PngEncoder::new(&mut writer)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ColorType::Rgba8,
            )
            .map_err(|source| WriteError::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        writer.flush().map_err(|source| WriteError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
    }

    temp.persist(path).map_err(|e| WriteError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Atomically replace `path` with `data`.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<(), WriteError> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|source| WriteError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|source| WriteError::TempFile {
        dir: dir.to_path_buf(),
        source,
    })?;
    temp.write_all(data).map_err(|source| WriteError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    temp.persist(path).map_err(|e| WriteError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba};
    use tempfile::TempDir;

    #[test]
    fn rgb_source_gets_opaque_alpha() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        RgbImage::from_pixel(3, 2, Rgb([10, 20, 30])).save(&path).unwrap();

        let img = load_rgba(&path).unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert!(img.pixels().all(|p| *p == Rgba([10, 20, 30, 255])));
    }

    #[test]
    fn undecodable_source_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();
        assert!(matches!(load_rgba(&path), Err(LoadError::Decode { .. })));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("include").join("a.png");
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 4]));

        write_png_atomic(&img, &path).unwrap();

        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.png")]);
        assert_eq!(load_rgba(&path).unwrap(), img);
    }
}
