//! JPEG encoding and multipart/x-mixed-replace framing.

use frame_source::FrameSource;
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::viewer::{
    annotate::overlay_fps,
    stream::{StepOutcome, StreamLoop},
};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JPEG encode failed: {cause}")]
    Jpeg {
        #[source]
        cause: image::ImageError,
    },
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: i32) -> Result<Vec<u8>, EncodeError> {
    let mut buffer = Vec::new();
    let quality = quality.clamp(1, 100) as u8;
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .map_err(|cause| EncodeError::Jpeg { cause })?;
    Ok(buffer)
}

/// Frame one encoded image as a multipart/x-mixed-replace part. A compliant
/// server pairs this with `Content-Type: multipart/x-mixed-replace;
/// boundary=frame` on the response.
pub(crate) fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(jpeg.len() + 64);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    payload
}

/// Pull-based MJPEG chunk sequence over a streaming loop.
///
/// The loop only advances when the consumer asks for the next chunk, so a
/// slow transport naturally back-pressures acquisition and detection. An
/// encode failure skips that chunk; the consumer simply gets no update that
/// tick. The sequence ends on stop, end-of-stream, or a fatal loop error.
pub struct MjpegStream<S: FrameSource> {
    inner: StreamLoop<S>,
    jpeg_quality: i32,
}

impl<S: FrameSource> MjpegStream<S> {
    pub fn new(inner: StreamLoop<S>, jpeg_quality: i32) -> Self {
        Self {
            inner,
            jpeg_quality,
        }
    }
}

impl<S: FrameSource> Iterator for MjpegStream<S> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.inner.step() {
                Ok(StepOutcome::Published(mut packet)) => {
                    overlay_fps(&mut packet.image, packet.fps);
                    match encode_jpeg(&packet.image, self.jpeg_quality) {
                        Ok(jpeg) => return Some(multipart_chunk(&jpeg)),
                        Err(err) => {
                            warn!("skipping frame #{}: {err}", packet.frame_number);
                        }
                    }
                }
                Ok(StepOutcome::Skipped) => {}
                Ok(StepOutcome::Finished(reason)) => {
                    debug!("mjpeg stream finished: {reason:?}");
                    return None;
                }
                Err(err) => {
                    error!("mjpeg stream failed: {err}");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::AtomicBool};

    use frame_source::SourceKind;

    use super::*;
    use crate::viewer::stream::testkit::{TestDetector, TestSource, quick_options};

    #[test]
    fn chunks_carry_the_multipart_boundary_framing() {
        let chunk = multipart_chunk(b"jpegbytes");
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(chunk.ends_with(b"jpegbytes\r\n"));
    }

    #[test]
    fn encoded_frames_are_jpeg() {
        let image = RgbImage::new(16, 16);
        let jpeg = encode_jpeg(&image, 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn stream_yields_one_chunk_per_frame_then_ends() {
        let source = TestSource::frames(SourceKind::NetworkStream, 2);
        let releases = source.releases.clone();
        let inner = StreamLoop::new(
            source,
            Box::new(TestDetector::new()),
            quick_options(),
            Arc::new(AtomicBool::new(false)),
        );
        let mut stream = MjpegStream::new(inner, 85);

        let first = stream.next().expect("first chunk");
        assert!(first.starts_with(b"--frame\r\n"));
        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
        assert_eq!(releases.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn fatal_loop_errors_end_the_sequence() {
        use crate::viewer::stream::testkit::ScriptedRead::*;
        let source = TestSource::new(SourceKind::LocalDevice, vec![Frame, Fail]);
        let inner = StreamLoop::new(
            source,
            Box::new(TestDetector::new()),
            quick_options(),
            Arc::new(AtomicBool::new(false)),
        );
        let mut stream = MjpegStream::new(inner, 85);

        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
    }
}
