//! Intra-run duplicate suppression for video and camera runs.
//!
//! A stationary pothole seen by a slow or fixed camera yields near-identical
//! boxes frame after frame. The deduplicator keeps the top-left corners of
//! every box accepted so far in the run and rejects a new box whose corner
//! lies strictly closer than `tolerance_px` to an accepted corner on both
//! axes. A tolerance of zero disables suppression.
//!
//! Limitations: only accepted boxes are compared, there is no tracking or
//! identity continuity, and nothing is remembered across runs.

use crate::detect::BoundingBox;

pub const DEFAULT_TOLERANCE_PX: u32 = 10;

#[derive(Clone, Debug)]
pub struct Deduplicator {
    tolerance_px: u32,
    accepted: Vec<(i32, i32)>,
    rejected: u64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_PX)
    }
}

impl Deduplicator {
    pub fn new(tolerance_px: u32) -> Self {
        Self {
            tolerance_px,
            accepted: Vec::new(),
            rejected: 0,
        }
    }

    /// Returns `true` and remembers the box when it is new to this run.
    pub fn offer(&mut self, bbox: &BoundingBox) -> bool {
        let tolerance = self.tolerance_px as i64;
        let duplicate = self.accepted.iter().any(|&(ax, ay)| {
            (bbox.x as i64 - ax as i64).abs() < tolerance
                && (bbox.y as i64 - ay as i64).abs() < tolerance
        });
        if duplicate {
            self.rejected += 1;
            return false;
        }
        self.accepted.push((bbox.x, bbox.y));
        true
    }

    pub fn accepted(&self) -> usize {
        self.accepted.len()
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: i32, y: i32) -> BoundingBox {
        BoundingBox::new(x, y, 40, 40)
    }

    #[test]
    fn near_corner_on_both_axes_is_rejected() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.offer(&at(100, 100)));
        assert!(!dedup.offer(&at(105, 108)));
        assert_eq!(dedup.rejected(), 1);
    }

    #[test]
    fn eleven_pixels_on_one_axis_is_accepted() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.offer(&at(100, 100)));
        assert!(dedup.offer(&at(100, 111)));
        assert_eq!(dedup.accepted(), 2);
    }

    #[test]
    fn exactly_tolerance_apart_is_a_new_pothole() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.offer(&at(100, 100)));
        assert!(dedup.offer(&at(110, 110)));
        assert!(dedup.offer(&at(90, 119)));
        assert!(!dedup.offer(&at(91, 109)));
        assert_eq!(dedup.accepted(), 3);
    }

    #[test]
    fn box_size_does_not_matter() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.offer(&BoundingBox::new(50, 50, 10, 10)));
        assert!(!dedup.offer(&BoundingBox::new(52, 48, 200, 200)));
    }

    #[test]
    fn only_accepted_boxes_are_compared() {
        let mut dedup = Deduplicator::default();
        assert!(dedup.offer(&at(100, 100)));
        // Rejected: within tolerance of (100, 100).
        assert!(!dedup.offer(&at(109, 100)));
        // 9px from the rejected corner, which is not remembered.
        assert!(dedup.offer(&at(118, 100)));
    }

    #[test]
    fn zero_tolerance_keeps_everything() {
        let mut dedup = Deduplicator::new(0);
        assert!(dedup.offer(&at(10, 10)));
        assert!(dedup.offer(&at(10, 10)));
        assert_eq!(dedup.rejected(), 0);
    }

    #[test]
    fn tolerance_of_one_drops_exact_repeats_only() {
        let mut dedup = Deduplicator::new(1);
        assert!(dedup.offer(&at(10, 10)));
        assert!(!dedup.offer(&at(10, 10)));
        assert!(dedup.offer(&at(11, 10)));
    }
}
