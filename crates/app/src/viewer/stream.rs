//! The streaming loop: acquire → detect → annotate → publish.
//!
//! One loop instance exclusively owns one open frame source and one detector.
//! Failure tolerance follows the source family: a local device that fails a
//! read or a detection is done for, a network stream gets its iteration
//! skipped and retried. Whatever path ends the loop, the source is released
//! exactly once before control returns to the caller; `Drop` covers external
//! cancellation.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use frame_source::{FrameSource, ReadOutcome, SourceError, SourceKind};
use ml_detect::{DetectError, Detector};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::viewer::{
    annotate::annotate_frame,
    data::{FramePacket, FrameSink},
    fps::FpsEstimator,
};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("failed to annotate frame #{frame}")]
    Annotate {
        frame: u64,
        #[source]
        cause: anyhow::Error,
    },
    #[error("{count} consecutive failed iterations on the network stream")]
    TooManyFailures {
        count: u32,
        #[source]
        cause: Box<StreamError>,
    },
}

/// Tunables for the loop's degrade-on-error policy.
#[derive(Clone, Debug)]
pub struct LoopOptions {
    /// Pause after a skipped network-mode iteration, so a dead connection is
    /// not busy-spun.
    pub retry_delay: Duration,
    /// Consecutive skipped iterations before a network stream is declared
    /// dead. `0` disables the ceiling.
    pub max_consecutive_failures: u32,
    /// Whether tracked-mode identities are dropped when an iteration skips.
    pub reset_tracks_on_skip: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(50),
            max_consecutive_failures: 120,
            reset_tracks_on_skip: false,
        }
    }
}

/// Why the loop came to an orderly stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The external stop signal was observed.
    Stopped,
    /// The source reported exhaustion.
    EndOfStream,
}

/// Result of advancing the loop by one iteration.
pub enum StepOutcome {
    Published(FramePacket),
    /// Recoverable failure; nothing was published this iteration.
    Skipped,
    Finished(StopReason),
}

pub struct StreamLoop<S: FrameSource> {
    source: Option<S>,
    detector: Box<dyn Detector>,
    options: LoopOptions,
    stop: Arc<AtomicBool>,
    fps: FpsEstimator,
    frame_number: u64,
    consecutive_failures: u32,
}

impl<S: FrameSource> StreamLoop<S> {
    pub fn new(
        source: S,
        detector: Box<dyn Detector>,
        options: LoopOptions,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source: Some(source),
            detector,
            options,
            stop,
            fps: FpsEstimator::new(),
            frame_number: 0,
            consecutive_failures: 0,
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Advance by one iteration. On a fatal error the source has already been
    /// released when this returns.
    pub fn step(&mut self) -> Result<StepOutcome, StreamError> {
        if self.stop.load(Ordering::Relaxed) {
            self.release();
            return Ok(StepOutcome::Finished(StopReason::Stopped));
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(StepOutcome::Finished(StopReason::Stopped));
        };
        let kind = source.kind();

        let frame = match source.read() {
            Ok(ReadOutcome::Frame(frame)) => frame,
            Ok(ReadOutcome::EndOfStream) => {
                debug!("source reported end of stream after {} frames", self.frame_number);
                self.release();
                return Ok(StepOutcome::Finished(StopReason::EndOfStream));
            }
            Err(err) => return self.degrade(kind, "read", err.into()),
        };

        let detect_start = Instant::now();
        let detections = match self
            .detector
            .detect(&frame.data, frame.width, frame.height)
        {
            Ok(detections) => detections,
            Err(err) => return self.degrade(kind, "detect", err.into()),
        };
        metrics::histogram!("viewer_detect_seconds").record(detect_start.elapsed().as_secs_f64());

        let image = match annotate_frame(&frame, &detections) {
            Ok(image) => image,
            Err(cause) => {
                let err = StreamError::Annotate {
                    frame: self.frame_number + 1,
                    cause,
                };
                return self.degrade(kind, "annotate", err);
            }
        };

        self.consecutive_failures = 0;
        self.frame_number += 1;
        let fps = self.fps.sample(Instant::now());
        metrics::counter!("viewer_frames_total").increment(1);
        metrics::gauge!("viewer_fps").set(fps as f64);

        Ok(StepOutcome::Published(FramePacket {
            image,
            detections,
            frame_number: self.frame_number,
            timestamp_ms: frame.timestamp_ms,
            fps,
        }))
    }

    /// Drive the loop against a UI sink until it finishes or fails.
    pub fn run(&mut self, sink: &mut dyn FrameSink) -> Result<StopReason, StreamError> {
        loop {
            match self.step() {
                Ok(StepOutcome::Published(packet)) => {
                    sink.display_frame(&packet);
                    sink.display_text(&format!("**FPS:** {}", packet.fps as i32));
                }
                Ok(StepOutcome::Skipped) => {}
                Ok(StepOutcome::Finished(reason)) => {
                    let note = match reason {
                        StopReason::Stopped => "stream stopped",
                        StopReason::EndOfStream => "stream ended",
                    };
                    sink.display_text(note);
                    return Ok(reason);
                }
                Err(err) => {
                    sink.display_text(&format!("stream failed: {err}"));
                    return Err(err);
                }
            }
        }
    }

    /// Apply the per-source-kind failure policy to a recoverable stage error.
    fn degrade(
        &mut self,
        kind: SourceKind,
        stage: &'static str,
        err: StreamError,
    ) -> Result<StepOutcome, StreamError> {
        if kind == SourceKind::LocalDevice {
            error!("{stage} failed on local device: {err}");
            self.release();
            return Err(err);
        }

        self.consecutive_failures += 1;
        metrics::counter!("viewer_skipped_iterations_total", "stage" => stage).increment(1);
        warn!(
            "{stage} failed on network stream, skipping iteration (consecutive failures: {}): {err}",
            self.consecutive_failures
        );

        let ceiling = self.options.max_consecutive_failures;
        if ceiling > 0 && self.consecutive_failures >= ceiling {
            error!("giving up on network stream after {} consecutive failures", ceiling);
            self.release();
            return Err(StreamError::TooManyFailures {
                count: self.consecutive_failures,
                cause: Box::new(err),
            });
        }

        if self.options.reset_tracks_on_skip {
            self.detector.reset_tracks();
        }
        if !self.options.retry_delay.is_zero() {
            thread::sleep(self.options.retry_delay);
        }
        Ok(StepOutcome::Skipped)
    }

    /// Release the source. Safe to call any number of times.
    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }
}

impl<S: FrameSource> Drop for StreamLoop<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::sync::atomic::AtomicUsize;

    use anyhow::anyhow;
    use frame_source::{Frame, FrameFormat};
    use ml_detect::Detection;

    use super::*;

    pub(crate) enum ScriptedRead {
        Frame,
        Fail,
        End,
    }

    /// Synthetic frame source following a fixed script of read outcomes.
    pub(crate) struct TestSource {
        kind: SourceKind,
        script: Vec<ScriptedRead>,
        cursor: usize,
        pub(crate) releases: Arc<AtomicUsize>,
    }

    impl TestSource {
        pub(crate) fn new(kind: SourceKind, script: Vec<ScriptedRead>) -> Self {
            Self {
                kind,
                script,
                cursor: 0,
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn frames(kind: SourceKind, count: usize) -> Self {
            let mut script: Vec<ScriptedRead> =
                (0..count).map(|_| ScriptedRead::Frame).collect();
            script.push(ScriptedRead::End);
            Self::new(kind, script)
        }
    }

    impl FrameSource for TestSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn read(&mut self) -> Result<ReadOutcome, SourceError> {
            let outcome = match self.script.get(self.cursor) {
                Some(ScriptedRead::Frame) => Ok(ReadOutcome::Frame(Frame {
                    data: vec![0u8; 16 * 16 * 3],
                    width: 16,
                    height: 16,
                    timestamp_ms: self.cursor as i64,
                    format: FrameFormat::Bgr8,
                })),
                Some(ScriptedRead::Fail) => Err(SourceError::Read {
                    uri: "test".to_string(),
                    cause: anyhow!("scripted read failure"),
                }),
                Some(ScriptedRead::End) | None => Ok(ReadOutcome::EndOfStream),
            };
            self.cursor += 1;
            outcome
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Detector stub returning one fixed detection per frame, with optional
    /// scripted failures by call number (1-based).
    pub(crate) struct TestDetector {
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) resets: Arc<AtomicUsize>,
        fail_on: Vec<usize>,
    }

    impl TestDetector {
        pub(crate) fn new() -> Self {
            Self::failing_on(Vec::new())
        }

        pub(crate) fn failing_on(fail_on: Vec<usize>) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                resets: Arc::new(AtomicUsize::new(0)),
                fail_on,
            }
        }
    }

    impl Detector for TestDetector {
        fn detect(
            &mut self,
            _bgr: &[u8],
            _width: i32,
            _height: i32,
        ) -> Result<Vec<Detection>, DetectError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                return Err(DetectError::Inference {
                    cause: anyhow!("scripted detection failure"),
                });
            }
            Ok(vec![Detection {
                bbox: [2.0, 2.0, 12.0, 12.0],
                class_id: 3,
                class_name: "car".to_string(),
                confidence: 0.9,
                track_id: None,
            }])
        }

        fn reset_tracks(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    #[derive(Default)]
    pub(crate) struct CollectSink {
        pub(crate) frames: Vec<FramePacket>,
        pub(crate) texts: Vec<String>,
    }

    impl FrameSink for CollectSink {
        fn display_frame(&mut self, packet: &FramePacket) {
            self.frames.push(packet.clone());
        }

        fn display_text(&mut self, markdown: &str) {
            self.texts.push(markdown.to_string());
        }
    }

    pub(crate) fn quick_options() -> LoopOptions {
        LoopOptions {
            retry_delay: Duration::ZERO,
            ..LoopOptions::default()
        }
    }
}
