use anyhow::Error;
use thiserror::Error;

/// Raw BGR frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy)]
pub enum FrameFormat {
    Bgr8,
}

/// Result of a single demand-driven read.
pub enum ReadOutcome {
    Frame(Frame),
    /// The source is exhausted. Not an error.
    EndOfStream,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source {uri:?}")]
    Unavailable { uri: String },
    #[error("failed to read frame from {uri:?}: {cause}")]
    Read {
        uri: String,
        #[source]
        cause: Error,
    },
    #[error(transparent)]
    Other(#[from] Error),
}

/// Family of a video source. The streaming loop keys its failure policy on
/// this: a local device that stops delivering frames is gone, a network
/// stream that hiccups usually comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    LocalDevice,
    NetworkStream,
}

impl SourceKind {
    /// Classify a source identifier. Bare integers and `/dev/videoN` paths
    /// are local devices; everything else (http/rtsp/udp URLs, file paths)
    /// is treated as a network stream.
    pub fn from_uri(uri: &str) -> Self {
        if parse_device_index(uri).is_some() {
            SourceKind::LocalDevice
        } else {
            SourceKind::NetworkStream
        }
    }
}

/// Parse a device index from a bare integer or `/dev/videoN` style URI.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

/// Common contract for frame producers.
///
/// `release` must be idempotent; implementations are expected to call it from
/// `Drop` as well so the underlying handle is returned on every exit path,
/// including external cancellation.
pub trait FrameSource {
    fn kind(&self) -> SourceKind;
    fn read(&mut self) -> Result<ReadOutcome, SourceError>;
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_index_parsing() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("3"), Some(3));
        assert_eq!(parse_device_index("/dev/video1"), Some(1));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("rtsp://host/stream"), None);
        assert_eq!(parse_device_index("video.mp4"), None);
    }

    #[test]
    fn source_kind_classification() {
        assert_eq!(SourceKind::from_uri("0"), SourceKind::LocalDevice);
        assert_eq!(SourceKind::from_uri("/dev/video2"), SourceKind::LocalDevice);
        assert_eq!(
            SourceKind::from_uri("http://192.168.100.4:8080/video"),
            SourceKind::NetworkStream
        );
        assert_eq!(
            SourceKind::from_uri("rtsp://camera.local/stream"),
            SourceKind::NetworkStream
        );
        assert_eq!(SourceKind::from_uri("clip.mp4"), SourceKind::NetworkStream);
    }
}
