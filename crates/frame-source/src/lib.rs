//! Video frame acquisition for the live detection viewer.
//!
//! A [`FrameSource`] hands out raw BGR frames on demand. The OpenCV-backed
//! [`CaptureSource`] covers the two real source families, local V4L devices
//! and network streams (IP webcams, RTSP, files), behind the same
//! open/read/release contract. Callers decide failure tolerance per
//! [`SourceKind`]: local read failures are typically fatal, network ones
//! transient.

pub use capture::{CaptureConfig, CaptureSource};
pub use types::{Frame, FrameFormat, FrameSource, ReadOutcome, SourceError, SourceKind};

mod capture;
mod types;
