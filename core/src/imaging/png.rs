//! PNG codecs for frames, columns and rasters.
//!
//! Loading decodes the whole file, so a successful load doubles as the
//! integrity check: truncated or corrupt files fail here and nowhere later.

use crate::fsio;
use crate::prelude::{StageError, StageResult};
use image::{ColorType, DynamicImage, ImageBuffer, ImageFormat, Luma, RgbImage};
use ndarray::Array2;
use std::path::Path;

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Fully decodes `path`.
pub fn load(path: &Path) -> StageResult<DynamicImage> {
    image::open(path).map_err(|e| StageError::image(path, e))
}

/// Reads a single-channel frame as a `(rows, cols)` array of 16-bit counts.
/// 8-bit frames are widened to the 16-bit range.
pub fn read_gray16(path: &Path) -> StageResult<Array2<u16>> {
    let image = load(path)?;
    match image.color() {
        ColorType::L16 | ColorType::L8 => {}
        other => {
            return Err(StageError::Shape {
                path: path.to_path_buf(),
                expected: "single-channel frame".into(),
                found: format!("{other:?}"),
            })
        }
    }
    gray16_to_array(path, image.into_luma16())
}

pub fn gray16_to_array(path: &Path, image: Gray16Image) -> StageResult<Array2<u16>> {
    let (width, height) = image.dimensions();
    Array2::from_shape_vec((height as usize, width as usize), image.into_raw()).map_err(|e| {
        StageError::Shape {
            path: path.to_path_buf(),
            expected: format!("{width}x{height} pixels"),
            found: e.to_string(),
        }
    })
}

pub fn array_to_gray16(path: &Path, frame: &Array2<u16>) -> StageResult<Gray16Image> {
    let (rows, cols) = frame.dim();
    ImageBuffer::from_raw(cols as u32, rows as u32, frame.iter().copied().collect()).ok_or_else(
        || StageError::Shape {
            path: path.to_path_buf(),
            expected: format!("{} samples", rows * cols),
            found: "a short buffer".into(),
        },
    )
}

/// Reads an 8-bit RGB image, rejecting anything that is not already RGB8.
pub fn read_rgb8(path: &Path) -> StageResult<RgbImage> {
    let image = load(path)?;
    if image.color() != ColorType::Rgb8 {
        return Err(StageError::Shape {
            path: path.to_path_buf(),
            expected: "8-bit RGB".into(),
            found: format!("{:?}", image.color()),
        });
    }
    Ok(image.into_rgb8())
}

pub fn write_gray16(path: &Path, frame: &Array2<u16>) -> StageResult<()> {
    let image = array_to_gray16(path, frame)?;
    write_image(path, &DynamicImage::ImageLuma16(image))
}

pub fn write_rgb8(path: &Path, image: &RgbImage) -> StageResult<()> {
    write_image(path, &DynamicImage::ImageRgb8(image.clone()))
}

/// Encodes `image` as PNG and renames it into place.
pub fn write_image(path: &Path, image: &DynamicImage) -> StageResult<()> {
    fsio::write_atomic(path, |writer| {
        image
            .write_to(writer, ImageFormat::Png)
            .map_err(|e| StageError::image(path, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn gray16_round_trip_preserves_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Array2::from_shape_fn((3, 4), |(r, c)| (r * 20_000 + c * 7) as u16);
        write_gray16(&path, &frame).unwrap();
        assert_eq!(read_gray16(&path).unwrap(), frame);
    }

    #[test]
    fn rgb_column_round_trip_is_lossless() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("column.png");
        let column = RgbImage::from_fn(1, 300, |_, y| Rgb([y as u8, 255 - y as u8, (y * 3) as u8]));
        write_rgb8(&path, &column).unwrap();
        let back = read_rgb8(&path).unwrap();
        assert_eq!(back.dimensions(), (1, 300));
        assert_eq!(back.as_raw(), column.as_raw());
    }

    #[test]
    fn truncated_file_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        write_gray16(&path, &Array2::from_elem((16, 16), 1234u16)).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(read_gray16(&path), Err(StageError::Image { .. })));
    }

    #[test]
    fn colour_frame_is_a_shape_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("colour.png");
        write_rgb8(&path, &RgbImage::new(4, 4)).unwrap();
        assert!(matches!(read_gray16(&path), Err(StageError::Shape { .. })));
    }
}
