//! Crossing imagery: crops, the composite crop strip, JPEG encoding and
//! artifact naming.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use crossline_core::geometry::NormBox;
use crossline_core::types::TrackId;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageError, Rgb, RgbImage};

/// JPEG quality of uploaded artifacts.
pub const JPEG_QUALITY: u8 = 90;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

const PADDING: Rgb<u8> = Rgb([255, 255, 255]);

/// Cut the box out of a frame. Always at least one pixel.
pub fn crop(frame: &RgbImage, bbox: &NormBox) -> RgbImage {
    let rect = bbox.to_pixels(frame.width(), frame.height());
    imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Place crops side by side, left to right, each centered vertically on a
/// white background as tall as the tallest crop.
pub fn composite(crops: &[RgbImage]) -> RgbImage {
    let width: u32 = crops.iter().map(RgbImage::width).sum();
    let height = crops.iter().map(RgbImage::height).max().unwrap_or(0);
    let mut strip = RgbImage::from_pixel(width.max(1), height.max(1), PADDING);

    let mut x: i64 = 0;
    for crop in crops {
        let top = (height - crop.height()) / 2;
        imageops::replace(&mut strip, crop, x, i64::from(top));
        x += i64::from(crop.width());
    }
    strip
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(bytes)
}

/// `(<location>_<YYYYMMDD_HHMMSS>_<track>.jpg, <location>_<YYYYMMDD_HHMMSS>_<track>_crop.jpg)`
pub fn artifact_names(
    camera_location: &str,
    crossed_at: DateTime<Utc>,
    track_id: TrackId,
) -> (String, String) {
    let stem = format!(
        "{}_{}_{track_id}",
        sanitize(camera_location),
        crossed_at.format("%Y%m%d_%H%M%S")
    );
    (format!("{stem}.jpg"), format!("{stem}_crop.jpg"))
}

/// Human-readable crossing time stored in artifact metadata.
pub fn crossing_time_text(crossed_at: DateTime<Utc>) -> String {
    crossed_at.format("%Y%m%d %H:%M:%S").to_string()
}

/// Keep names usable as object keys and file names.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn crop_uses_pixel_rect() {
        let frame = RgbImage::from_fn(100, 50, |x, y| Rgb([x as u8, y as u8, 0]));
        let cropped = crop(&frame, &NormBox::new(0.1, 0.2, 0.3, 0.6));
        assert_eq!(cropped.dimensions(), (20, 20));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([10, 10, 0]));
    }

    #[test]
    fn composite_pads_shorter_crops_centered() {
        let tall = RgbImage::from_pixel(4, 10, Rgb([0, 0, 0]));
        let short = RgbImage::from_pixel(6, 4, Rgb([10, 10, 10]));
        let strip = composite(&[tall, short]);

        assert_eq!(strip.dimensions(), (10, 10));
        // short crop occupies rows 3..7 of columns 4..10
        assert_eq!(strip.get_pixel(5, 2), &PADDING);
        assert_eq!(strip.get_pixel(5, 3), &Rgb([10, 10, 10]));
        assert_eq!(strip.get_pixel(5, 6), &Rgb([10, 10, 10]));
        assert_eq!(strip.get_pixel(5, 7), &PADDING);
        assert_eq!(strip.get_pixel(0, 9), &Rgb([0, 0, 0]));
    }

    #[test]
    fn composite_of_single_crop_is_the_crop() {
        let only = RgbImage::from_pixel(3, 5, Rgb([1, 2, 3]));
        assert_eq!(composite(std::slice::from_ref(&only)), only);
    }

    #[test]
    fn jpeg_has_magic_bytes() {
        let bytes = encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([200, 0, 0]))).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn names() {
        let at = Utc.with_ymd_and_hms(2024, 12, 17, 10, 15, 3).unwrap();
        let (full, crop) = artifact_names("Finish line", at, 7);
        assert_eq!(full, "Finish_line_20241217_101503_7.jpg");
        assert_eq!(crop, "Finish_line_20241217_101503_7_crop.jpg");
        assert_eq!(crossing_time_text(at), "20241217 10:15:03");
    }
}
