//! Greedy IoU tracker backing tracked-mode detection.

use crate::adapter::Detection;

const IOU_MATCH_THRESHOLD: f32 = 0.3;
/// Consecutive frames a track may go unmatched before it is dropped.
const MAX_TRACK_MISSES: u32 = 30;

struct Track {
    id: i64,
    bbox: [f32; 4],
    misses: u32,
}

/// Associates detections with prior-frame tracks by IoU overlap, assigning
/// monotonically increasing identities. Identities are never reused.
#[derive(Default)]
pub(crate) struct IouTracker {
    tracks: Vec<Track>,
    next_id: i64,
}

impl IouTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Assign a track id to every detection, matching greedily against live
    /// tracks and minting new ids for unmatched detections.
    pub(crate) fn assign(&mut self, detections: &mut [Detection]) {
        let mut claimed = vec![false; self.tracks.len()];

        for det in detections.iter_mut() {
            let mut best: Option<(usize, f32)> = None;
            for (idx, track) in self.tracks.iter().enumerate() {
                if claimed[idx] {
                    continue;
                }
                let overlap = iou(&det.bbox, &track.bbox);
                if overlap >= IOU_MATCH_THRESHOLD
                    && best.map_or(true, |(_, score)| overlap > score)
                {
                    best = Some((idx, overlap));
                }
            }

            match best {
                Some((idx, _)) => {
                    claimed[idx] = true;
                    let track = &mut self.tracks[idx];
                    track.bbox = det.bbox;
                    track.misses = 0;
                    det.track_id = Some(track.id);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        bbox: det.bbox,
                        misses: 0,
                    });
                    claimed.push(true);
                    det.track_id = Some(id);
                }
            }
        }

        for (idx, track) in self.tracks.iter_mut().enumerate() {
            if !claimed[idx] {
                track.misses += 1;
            }
        }
        self.tracks.retain(|track| track.misses <= MAX_TRACK_MISSES);
    }

    /// Drop all tracks. Future ids continue from where they left off.
    pub(crate) fn reset(&mut self) {
        self.tracks.clear();
    }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4]) -> Detection {
        Detection {
            bbox,
            class_id: 0,
            class_name: "pedestrian".to_string(),
            confidence: 0.9,
            track_id: None,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]), 0.0);
    }

    #[test]
    fn overlapping_detection_keeps_its_track_id() {
        let mut tracker = IouTracker::new();

        let mut first = [det([0.0, 0.0, 10.0, 10.0])];
        tracker.assign(&mut first);
        assert_eq!(first[0].track_id, Some(0));

        // Slightly shifted box in the next frame, same object.
        let mut second = [det([1.0, 1.0, 11.0, 11.0])];
        tracker.assign(&mut second);
        assert_eq!(second[0].track_id, Some(0));
    }

    #[test]
    fn disjoint_detection_gets_a_fresh_id() {
        let mut tracker = IouTracker::new();

        let mut first = [det([0.0, 0.0, 10.0, 10.0])];
        tracker.assign(&mut first);

        let mut second = [det([100.0, 100.0, 120.0, 120.0])];
        tracker.assign(&mut second);
        assert_eq!(second[0].track_id, Some(1));
    }

    #[test]
    fn reset_clears_tracks_but_not_the_id_counter() {
        let mut tracker = IouTracker::new();

        let mut first = [det([0.0, 0.0, 10.0, 10.0])];
        tracker.assign(&mut first);
        tracker.reset();

        let mut second = [det([0.0, 0.0, 10.0, 10.0])];
        tracker.assign(&mut second);
        assert_eq!(second[0].track_id, Some(1));
    }
}
