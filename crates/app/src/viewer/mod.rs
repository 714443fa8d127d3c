//! Live detection viewer: captures frames, runs the detector, and exposes the
//! annotated feed over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `stream`: The acquire → detect → annotate → publish loop.
//! - `annotate`: Drawing primitives for boxes, labels, and the FPS stamp.
//! - `fps`: Instantaneous frames-per-second estimation.
//! - `encoding`: JPEG encoding and multipart stream framing.
//! - `still`: One-shot detection on a single image.
//! - `server`: Actix Web endpoints.
//! - `telemetry`: Tracing subscriber and Prometheus recorder setup.
//! - `runtime`: CUDA runtime loader glue.
//! - `data`: Shared structs passed between stages.

pub use config::{DETECT_USAGE, DetectConfig, SERVE_USAGE, ViewerConfig};
pub use data::{FramePacket, FrameSink, LatestFrame};
pub use encoding::{EncodeError, MjpegStream};
pub use still::{StillDetection, detect_image};
pub use stream::{LoopOptions, StepOutcome, StopReason, StreamError, StreamLoop};

mod annotate;
mod config;
mod data;
mod encoding;
mod fps;
pub(crate) mod runtime;
pub mod server;
mod still;
mod stream;
pub(crate) mod telemetry;
