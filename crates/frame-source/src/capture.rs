//! OpenCV-backed capture source.

use anyhow::anyhow;
use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::warn;

use crate::types::{
    Frame, FrameFormat, FrameSource, ReadOutcome, SourceError, SourceKind, parse_device_index,
};

/// Capture settings applied best-effort to the underlying device or stream.
/// The source may ignore any of them (a webcam that cannot do the requested
/// fourcc simply keeps its own). Values are not range-checked.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    /// Four-character codec request, e.g. `"YUY2"` or `"MJPG"`.
    pub fourcc: Option<String>,
    /// Driver-side frame buffer depth, network sources only. Small values
    /// favour freshness over smoothness.
    pub buffer_depth: Option<i32>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            fourcc: Some("YUY2".to_string()),
            buffer_depth: Some(2),
        }
    }
}

/// A video source owning an OpenCV `VideoCapture` handle.
///
/// Frames are read on demand and resized to the configured geometry when the
/// device delivers something else. The handle is released at most once;
/// `release` may be called any number of times and also runs on drop.
pub struct CaptureSource {
    uri: String,
    kind: SourceKind,
    target_size: (i32, i32),
    cap: Option<VideoCapture>,
    frame: Mat,
    scratch: Mat,
}

impl CaptureSource {
    pub fn open(uri: &str, config: &CaptureConfig) -> Result<Self, SourceError> {
        let (kind, mut cap) = match parse_device_index(uri) {
            Some(index) => (SourceKind::LocalDevice, open_device(index, uri)?),
            None => (SourceKind::NetworkStream, open_stream(uri)?),
        };
        configure_capture(&mut cap, kind, config);
        Ok(Self {
            uri: uri.to_string(),
            kind,
            target_size: (config.width, config.height),
            cap: Some(cap),
            frame: Mat::default(),
            scratch: Mat::default(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn read_error(&self, cause: anyhow::Error) -> SourceError {
        SourceError::Read {
            uri: self.uri.clone(),
            cause,
        }
    }
}

impl FrameSource for CaptureSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn read(&mut self) -> Result<ReadOutcome, SourceError> {
        let uri = self.uri.clone();
        let Some(cap) = self.cap.as_mut() else {
            return Err(SourceError::Read {
                uri,
                cause: anyhow!("source already released"),
            });
        };

        let grabbed = cap.read(&mut self.frame).map_err(|e| SourceError::Read {
            uri: uri.clone(),
            cause: e.into(),
        })?;
        let size = self.frame.size().map_err(|e| SourceError::Read {
            uri: uri.clone(),
            cause: e.into(),
        })?;

        if !grabbed || size.width <= 0 || size.height <= 0 {
            // OpenCV reports exhaustion and transient failure identically; a
            // finite stream whose position reached its frame count is done.
            if at_end_of_finite_stream(cap) {
                return Ok(ReadOutcome::EndOfStream);
            }
            return Err(SourceError::Read {
                uri,
                cause: anyhow!("capture returned no frame"),
            });
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| SourceError::Read {
                uri: uri.clone(),
                cause: e.into(),
            })?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| self.read_error(e.into()))?
            .to_vec();

        Ok(ReadOutcome::Frame(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }))
    }

    fn release(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            if let Err(err) = cap.release() {
                warn!("failed to release capture for {}: {err}", self.uri);
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Attempt to open a local device by index, preferring V4L.
fn open_device(index: i32, uri: &str) -> Result<VideoCapture, SourceError> {
    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::new(index, backend) {
            Ok(cap) => {
                if cap.is_opened().unwrap_or(false) {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open device #{index} with backend {backend}: {err}");
            }
        }
    }
    Err(SourceError::Unavailable {
        uri: uri.to_string(),
    })
}

/// Attempt to open a stream URL or file, preferring FFmpeg.
fn open_stream(uri: &str) -> Result<VideoCapture, SourceError> {
    for backend in [videoio::CAP_FFMPEG, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().unwrap_or(false) {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }
    Err(SourceError::Unavailable {
        uri: uri.to_string(),
    })
}

/// Apply the requested capture settings. All of this is best-effort.
fn configure_capture(cap: &mut VideoCapture, kind: SourceKind, config: &CaptureConfig) {
    if let Some(code) = config.fourcc.as_deref() {
        match fourcc_chars(code) {
            Some([a, b, c, d]) => {
                if let Ok(fourcc) = videoio::VideoWriter::fourcc(a, b, c, d) {
                    let _ = cap.set(videoio::CAP_PROP_FOURCC, fourcc as f64);
                }
            }
            None => warn!("ignoring fourcc {code:?}: expected exactly four characters"),
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, config.fps);
    if kind == SourceKind::NetworkStream {
        if let Some(depth) = config.buffer_depth {
            let _ = cap.set(videoio::CAP_PROP_BUFFERSIZE, depth as f64);
        }
    }
}

fn at_end_of_finite_stream(cap: &VideoCapture) -> bool {
    let total = cap.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
    let pos = cap.get(videoio::CAP_PROP_POS_FRAMES).unwrap_or(0.0);
    total > 0.0 && pos >= total
}

fn fourcc_chars(code: &str) -> Option<[char; 4]> {
    let mut chars = code.chars();
    let out = [chars.next()?, chars.next()?, chars.next()?, chars.next()?];
    if chars.next().is_some() { None } else { Some(out) }
}
