use std::path::PathBuf;

use anyhow::Error;
use serde::Serialize;
use thiserror::Error;

/// Single detected object, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
    pub class_id: i64,
    pub class_name: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    /// Persistent identity, tracked mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

/// Per-frame independent detection, or detection with persistent object
/// identities across successive frames of the same stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectMode {
    Plain,
    Tracked,
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to load detection model from {path:?}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        cause: Error,
    },
    #[error("frame preprocessing failed: {cause}")]
    Preprocess {
        #[source]
        cause: Error,
    },
    #[error("detector inference failed: {cause}")]
    Inference {
        #[source]
        cause: Error,
    },
}

/// Common interface for object detectors.
///
/// Implementations own whatever cross-call state their mode requires; the
/// caller only supplies frames in stream order.
pub trait Detector: Send {
    /// Detect objects in one BGR8 frame.
    fn detect(
        &mut self,
        bgr: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<Detection>, DetectError>;

    /// Drop any cross-frame identity state. No-op for stateless detectors.
    fn reset_tracks(&mut self) {}

    /// Detector name for logging.
    fn name(&self) -> &str;
}
