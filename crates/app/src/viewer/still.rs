//! One-shot detection on a single uploaded image. No loop or stream state
//! involved; the caller hands over encoded bytes and gets the annotated JPEG
//! back synchronously.

use anyhow::{Context, Result};
use chrono::Utc;
use frame_source::{Frame, FrameFormat};
use ml_detect::{Detection, Detector};

use crate::viewer::{
    annotate::{annotate_frame, rgb_to_bgr},
    encoding::encode_jpeg,
};

pub struct StillDetection {
    pub jpeg: Vec<u8>,
    pub detections: Vec<Detection>,
}

/// Decode an image, detect once, and return the annotated JPEG plus the raw
/// detection list.
pub fn detect_image(
    detector: &mut dyn Detector,
    bytes: &[u8],
    jpeg_quality: i32,
) -> Result<StillDetection> {
    let decoded = image::load_from_memory(bytes).context("failed to decode uploaded image")?;
    let rgb = decoded.to_rgb8();
    let (width, height) = (rgb.width() as i32, rgb.height() as i32);

    let frame = Frame {
        data: rgb_to_bgr(rgb.as_raw()),
        width,
        height,
        timestamp_ms: Utc::now().timestamp_millis(),
        format: FrameFormat::Bgr8,
    };

    let detections = detector
        .detect(&frame.data, frame.width, frame.height)
        .context("detection failed")?;
    let annotated = annotate_frame(&frame, &detections)?;
    let jpeg = encode_jpeg(&annotated, jpeg_quality)?;

    Ok(StillDetection { jpeg, detections })
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;
    use crate::viewer::stream::testkit::TestDetector;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::new(width, height);
        let mut bytes = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn returns_annotated_jpeg_and_detections() {
        let mut detector = TestDetector::new();
        let result = detect_image(&mut detector, &png_bytes(32, 32), 85).unwrap();
        assert_eq!(result.detections.len(), 1);
        assert_eq!(&result.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn rejects_garbage_input() {
        let mut detector = TestDetector::new();
        assert!(detect_image(&mut detector, b"not an image", 85).is_err());
    }
}
