use std::sync::{Arc, Mutex};

use image::RgbImage;
use ml_detect::Detection;

/// One published iteration of the streaming loop: the annotated frame plus
/// everything a sink may want to show alongside it.
#[derive(Clone)]
pub struct FramePacket {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
    pub frame_number: u64,
    pub timestamp_ms: i64,
    pub fps: f32,
}

/// Display-side contract for the streaming loop's UI mode. Called once per
/// published iteration; no return value is consumed, a sink that cannot show
/// something simply drops it.
pub trait FrameSink {
    fn display_frame(&mut self, packet: &FramePacket);
    fn display_text(&mut self, markdown: &str);
}

#[derive(Default)]
struct LatestFrameState {
    packet: Option<FramePacket>,
    status: String,
}

/// Overwrite-in-place display slot: holds only the most recent frame and
/// status line, no buffering or backlog.
#[derive(Clone, Default)]
pub struct LatestFrame {
    inner: Arc<Mutex<LatestFrameState>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet(&self) -> Option<FramePacket> {
        match self.inner.lock() {
            Ok(guard) => guard.packet.clone(),
            Err(_) => None,
        }
    }

    pub fn status(&self) -> String {
        match self.inner.lock() {
            Ok(guard) => guard.status.clone(),
            Err(_) => String::new(),
        }
    }
}

impl FrameSink for LatestFrame {
    fn display_frame(&mut self, packet: &FramePacket) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.packet = Some(packet.clone());
        }
    }

    fn display_text(&mut self, markdown: &str) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.status = markdown.to_string();
        }
    }
}
