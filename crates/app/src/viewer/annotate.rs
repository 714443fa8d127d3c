//! Box and label drawing for annotated frames.
//!
//! Pure transforms: the input frame is copied into a fresh RGB buffer before
//! anything is drawn, so callers may keep using the raw frame. Text uses an
//! embedded 5×7 glyph font, keeping the binary free of font files.

use anyhow::{Result, anyhow};
use frame_source::Frame;
use image::{Rgb, RgbImage};
use ml_detect::Detection;

/// Box outline and label background, the original viewer's dark purple.
pub(crate) const BOX_COLOR: Rgb<u8> = Rgb([52, 25, 48]);
pub(crate) const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub(crate) const FPS_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const BOX_THICKNESS: i32 = 2;
/// Glyph cell advance in pixels.
const GLYPH_ADVANCE: i32 = 6;

/// Draw one rectangle and one label per detection onto a copy of the frame.
pub(crate) fn annotate_frame(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let rgb = bgr_to_rgb(&frame.data);
    let mut image = RgbImage::from_vec(width, height, rgb)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    for det in detections {
        let left = det.bbox[0].round() as i32;
        let top = det.bbox[1].round() as i32;
        let right = det.bbox[2].round() as i32;
        let bottom = det.bbox[3].round() as i32;
        draw_rectangle(&mut image, left, top, right, bottom, BOX_COLOR);
    }

    for det in detections {
        let label = format_label(det);
        let label_x = (det.bbox[0].round() as i32).max(0);
        let label_y = (det.bbox[1].round() as i32 - 12).max(0);
        let text_width = label.chars().count() as i32 * GLYPH_ADVANCE;
        fill_rect(
            &mut image,
            label_x,
            label_y,
            label_x + text_width + 4,
            label_y + 9,
            BOX_COLOR,
        );
        draw_label(&mut image, label_x + 2, label_y + 1, &label, LABEL_TEXT_COLOR);
    }

    Ok(image)
}

/// Stamp the instantaneous FPS readout onto a frame bound for the stream.
pub(crate) fn overlay_fps(image: &mut RgbImage, fps: f32) {
    let text = format!("FPS: {}", fps as i32);
    draw_label(image, 10, 50, &text, FPS_COLOR);
}

/// Label text for one detection: class name, track id when present, and the
/// confidence rounded up to two decimals.
pub(crate) fn format_label(det: &Detection) -> String {
    let confidence = ceil_confidence(det.confidence);
    match det.track_id {
        Some(id) => format!("{} {id} {confidence:.2}", det.class_name),
        None => format!("{} {confidence:.2}", det.class_name),
    }
}

/// Round a confidence up to two decimals. The displayed value must never
/// exceed precision in the flattering direction: 0.871 renders as 0.88, not
/// 0.87.
pub(crate) fn ceil_confidence(confidence: f32) -> f32 {
    (confidence * 100.0).ceil() / 100.0
}

pub(crate) fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

pub(crate) fn rgb_to_bgr(input: &[u8]) -> Vec<u8> {
    // Same channel swap in the other direction.
    bgr_to_rgb(input)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        draw_rectangle_outline(
            image,
            left + inset,
            top + inset,
            right - inset,
            bottom - inset,
            color,
        );
    }
}

fn draw_rectangle_outline(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for x in left..=right {
        *image.get_pixel_mut(x as u32, top as u32) = color;
        *image.get_pixel_mut(x as u32, bottom as u32) = color;
    }
    for y in top..=bottom {
        *image.get_pixel_mut(left as u32, y as u32) = color;
        *image.get_pixel_mut(right as u32, y as u32) = color;
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

#[rustfmt::skip]
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000]),
        'G' => Some([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'J' => Some([0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'Q' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001]),
        'X' => Some([0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b01010, 0b10001]),
        'Y' => Some([0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'Z' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ':' => Some([0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0]),
        '-' => Some([0, 0, 0, 0b01110, 0, 0, 0]),
        '%' => Some([0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use frame_source::FrameFormat;

    use super::*;

    fn black_frame(width: i32, height: i32) -> Frame {
        Frame {
            data: vec![0u8; (width * height * 3) as usize],
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    fn det(bbox: [f32; 4], confidence: f32) -> Detection {
        Detection {
            bbox,
            class_id: 3,
            class_name: "car".to_string(),
            confidence,
            track_id: None,
        }
    }

    #[test]
    fn confidence_rounds_up_to_two_decimals() {
        assert_eq!(ceil_confidence(0.871), 0.88);
        assert_eq!(ceil_confidence(0.25), 0.25);
        assert_eq!(format!("{:.2}", ceil_confidence(0.871)), "0.88");
        assert_eq!(format!("{:.2}", ceil_confidence(0.999)), "1.00");
    }

    #[test]
    fn label_text_contains_class_and_ceiled_confidence() {
        let d = det([0.0, 0.0, 10.0, 10.0], 0.871);
        assert_eq!(format_label(&d), "car 0.88");

        let mut tracked = d.clone();
        tracked.track_id = Some(7);
        assert_eq!(format_label(&tracked), "car 7 0.88");
    }

    #[test]
    fn draws_one_box_and_one_label_per_detection() {
        let frame = black_frame(64, 64);
        let detections = [
            det([10.0, 20.0, 40.0, 50.0], 0.9),
            det([5.0, 5.0, 20.0, 15.0], 0.8),
        ];
        let image = annotate_frame(&frame, &detections).unwrap();

        // Box corners for each detection.
        assert_eq!(*image.get_pixel(10, 20), BOX_COLOR);
        assert_eq!(*image.get_pixel(40, 50), BOX_COLOR);
        assert_eq!(*image.get_pixel(5, 5), BOX_COLOR);
        assert_eq!(*image.get_pixel(20, 15), BOX_COLOR);

        // Label backgrounds sit at the box's top-left, clamped to the frame:
        // first detection at y = 20 - 12 = 8, second clamps 5 - 12 to 0.
        assert_eq!(*image.get_pixel(10, 8), BOX_COLOR);
        assert_eq!(*image.get_pixel(5, 0), BOX_COLOR);
    }

    #[test]
    fn no_detections_leaves_the_frame_untouched() {
        let frame = black_frame(16, 16);
        let image = annotate_frame(&frame, &[]).unwrap();
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn rejects_frames_with_mismatched_buffers() {
        let mut frame = black_frame(16, 16);
        frame.data.truncate(10);
        assert!(annotate_frame(&frame, &[]).is_err());
    }

    #[test]
    fn channel_swap_round_trips() {
        let bgr = vec![1u8, 2, 3, 4, 5, 6];
        let rgb = bgr_to_rgb(&bgr);
        assert_eq!(rgb, vec![3, 2, 1, 6, 5, 4]);
        assert_eq!(rgb_to_bgr(&rgb), bgr);
    }

    #[test]
    fn fps_overlay_stamps_green_pixels() {
        let frame = black_frame(120, 80);
        let mut image = annotate_frame(&frame, &[]).unwrap();
        overlay_fps(&mut image, 24.7);
        let stamped = image.pixels().filter(|p| **p == FPS_COLOR).count();
        assert!(stamped > 0);
    }
}
