use std::time::Instant;

/// Instantaneous frames-per-second estimate from consecutive timestamps.
///
/// The only state is the previous sample time; the very first sample has no
/// predecessor and is defined as `0.0` rather than a division by nothing.
#[derive(Default)]
pub(crate) struct FpsEstimator {
    previous: Option<Instant>,
}

impl FpsEstimator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sample(&mut self, now: Instant) -> f32 {
        let rate = match self.previous {
            Some(previous) => {
                let elapsed = now.duration_since(previous).as_secs_f32();
                if elapsed > 0.0 { 1.0 / elapsed } else { 0.0 }
            }
            None => 0.0,
        };
        self.previous = Some(now);
        rate
    }
}
