//! TorchScript-backed detector.

use std::{convert::TryFrom, path::Path};

use anyhow::anyhow;
use tch::{self, Device, Kind, Tensor};

use crate::{
    adapter::{DetectError, DetectMode, Detection, Detector},
    classes::ClassTable,
    tracker::IouTracker,
};

/// Hard cap on detections kept per frame.
const MAX_DETECTIONS: usize = 512;

/// Wraps a TorchScript detection module behind the [`Detector`] trait.
///
/// Frames are resized to the module's input geometry on-tensor; output boxes
/// come back in input coordinates and are mapped to frame pixels before being
/// returned. In tracked mode the detector owns an [`IouTracker`] whose state
/// spans calls.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    confidence_threshold: f32,
    classes: ClassTable,
    tracker: Option<IouTracker>,
}

impl TorchDetector {
    /// Load a TorchScript module and prepare it for the requested device.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
        classes: ClassTable,
        mode: DetectMode,
    ) -> Result<Self, DetectError> {
        let path = model_path.as_ref();
        let module =
            tch::CModule::load_on_device(path, device).map_err(|err| DetectError::ModelLoad {
                path: path.to_owned(),
                cause: err.into(),
            })?;
        Ok(Self {
            module,
            device,
            input_size,
            confidence_threshold: 0.25,
            classes,
            tracker: match mode {
                DetectMode::Plain => None,
                DetectMode::Tracked => Some(IouTracker::new()),
            },
        })
    }

    /// Override the confidence threshold used for filtering detections.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn input_size(&self) -> (i64, i64) {
        self.input_size
    }

    /// Convert a BGR8 frame into a normalized RGB tensor at the module's
    /// input geometry.
    fn bgr_to_tensor(&self, bgr: &[u8], width: i32, height: i32) -> Result<Tensor, DetectError> {
        let expected = (width as usize) * (height as usize) * 3;
        if bgr.len() != expected {
            return Err(DetectError::Preprocess {
                cause: anyhow!(
                    "unexpected frame buffer size: got {} bytes, expected {expected}",
                    bgr.len()
                ),
            });
        }

        let tensor = Tensor::from_slice(bgr)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, height as i64, width as i64, 3])
            .flip([3])
            .permute([0, 3, 1, 2])
            / 255.0;

        let (in_w, in_h) = self.input_size;
        let tensor = if (width as i64, height as i64) != (in_w, in_h) {
            tensor.upsample_bilinear2d([in_h, in_w], false, None, None)
        } else {
            tensor
        };

        Ok(tensor)
    }

    /// Execute the module and map filtered predictions to frame pixels.
    fn run_module(
        &self,
        input: &Tensor,
        frame_width: i32,
        frame_height: i32,
    ) -> Result<Vec<Detection>, DetectError> {
        let output = self
            .module
            .forward_ts(&[input])
            .map_err(|err| DetectError::Inference { cause: err.into() })?;

        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(DetectError::Inference {
                cause: anyhow!("unexpected detector output shape: {shape:?}"),
            });
        }
        if shape[1] < 5 {
            return Err(DetectError::Inference {
                cause: anyhow!(
                    "detector output requires at least 5 channels (x,y,w,h,conf), got {}",
                    shape[1]
                ),
            });
        }

        let preds = output
            .to_device(Device::Cpu)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)
            .map_err(|err| DetectError::Inference { cause: err.into() })?;

        let (in_w, in_h) = self.input_size;
        let scale_x = if in_w > 0 {
            frame_width as f32 / in_w as f32
        } else {
            1.0
        };
        let scale_y = if in_h > 0 {
            frame_height as f32 / in_h as f32
        } else {
            1.0
        };

        let mut detections = Vec::new();
        for row in rows {
            if row.len() < 5 {
                continue;
            }
            let score = row[4];
            if score < self.confidence_threshold {
                continue;
            }
            let class_id = if row.len() > 5 { row[5] as i64 } else { 0 };
            let bbox = xywh_to_frame_xyxy(
                [row[0], row[1], row[2], row[3]],
                scale_x,
                scale_y,
                frame_width,
                frame_height,
            );
            detections.push(Detection {
                bbox,
                class_id,
                class_name: self.classes.name(class_id),
                confidence: score,
                track_id: None,
            });
            if detections.len() >= MAX_DETECTIONS {
                break;
            }
        }

        Ok(detections)
    }
}

impl Detector for TorchDetector {
    fn detect(
        &mut self,
        bgr: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<Detection>, DetectError> {
        let input = self.bgr_to_tensor(bgr, width, height)?;
        let mut detections = self.run_module(&input, width, height)?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.assign(&mut detections);
        }
        Ok(detections)
    }

    fn reset_tracks(&mut self) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.reset();
        }
    }

    fn name(&self) -> &str {
        "torchscript"
    }
}

/// Map a center-format box in detector-input coordinates to a clamped
/// `[x1, y1, x2, y2]` box in frame pixels.
fn xywh_to_frame_xyxy(
    xywh: [f32; 4],
    scale_x: f32,
    scale_y: f32,
    frame_width: i32,
    frame_height: i32,
) -> [f32; 4] {
    let [cx, cy, w, h] = xywh;
    let max_x = (frame_width - 1).max(0) as f32;
    let max_y = (frame_height - 1).max(0) as f32;
    [
        ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
        ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
        ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
        ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_boxes_map_to_scaled_corners() {
        // 640x640 detector space onto a 1280x720 frame.
        let bbox = xywh_to_frame_xyxy([320.0, 320.0, 100.0, 50.0], 2.0, 1.125, 1280, 720);
        assert_eq!(bbox, [540.0, 331.875, 740.0, 388.125]);
    }

    #[test]
    fn boxes_are_clamped_to_the_frame() {
        let bbox = xywh_to_frame_xyxy([0.0, 0.0, 100.0, 100.0], 1.0, 1.0, 640, 480);
        assert_eq!(bbox[0], 0.0);
        assert_eq!(bbox[1], 0.0);

        let bbox = xywh_to_frame_xyxy([640.0, 480.0, 100.0, 100.0], 1.0, 1.0, 640, 480);
        assert_eq!(bbox[2], 639.0);
        assert_eq!(bbox[3], 479.0);
    }
}
