// ================================
// src/lidar.rs - range frame preprocessing and gap extraction
// ================================
use crate::{
    config::{ControlParameters, CorridorFractions, Tuning},
    error::FrameError,
};
use log::debug;
use serde::Deserialize;

/// Slack allowed between the sample count and the count implied by the
/// angle metadata (drivers disagree on whether `angle_max` is inclusive).
pub const SAMPLE_COUNT_TOLERANCE: f32 = 1.0;

/// Fraction of a sample absorbed when converting an angle back to an index.
pub const INDEX_TOLERANCE: f32 = 1.0e-3;

/// One sweep of the planar range sensor.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RangeFrame {
    pub ranges: Vec<f32>,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
}

impl RangeFrame {
    pub fn new(ranges: Vec<f32>, angle_min: f32, angle_max: f32, angle_increment: f32) -> Self {
        Self {
            ranges,
            angle_min,
            angle_max,
            angle_increment,
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Reject frames the pipeline cannot work on.
    pub fn validate(&self, expected_samples: Option<usize>) -> Result<(), FrameError> {
        if self.ranges.is_empty() {
            return Err(FrameError::Empty);
        }
        if !self.angle_increment.is_finite() || self.angle_increment <= 0.0 {
            return Err(FrameError::InvalidIncrement(self.angle_increment));
        }
        if !self.angle_min.is_finite()
            || !self.angle_max.is_finite()
            || self.angle_max < self.angle_min
        {
            return Err(FrameError::InvalidBounds {
                min: self.angle_min,
                max: self.angle_max,
            });
        }

        let described = (self.angle_max - self.angle_min) / self.angle_increment + 1.0;
        if (described - self.ranges.len() as f32).abs() > SAMPLE_COUNT_TOLERANCE {
            return Err(FrameError::InconsistentLength {
                expected: described,
                actual: self.ranges.len(),
            });
        }

        match expected_samples {
            Some(expected) if expected != self.ranges.len() => Err(FrameError::UnexpectedLength {
                expected,
                actual: self.ranges.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Sensor angle of sample `index`.
    pub fn angle_at(&self, index: usize) -> f32 {
        self.angle_min + index as f32 * self.angle_increment
    }

    /// Inverse of [`angle_at`](Self::angle_at), truncated toward zero.
    /// May fall outside the frame for angles beyond the sweep.
    pub fn index_of(&self, angle: f32) -> i64 {
        let position = (angle - self.angle_min) / self.angle_increment;
        // exact sample angles must not truncate to the previous sample
        let position = position + INDEX_TOLERANCE.copysign(position);
        position as i64
    }
}

/// Front-facing half-open index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corridor {
    pub start: usize,
    pub end: usize,
}

impl Corridor {
    pub fn for_len(len: usize, fractions: &CorridorFractions) -> Self {
        let (start, end) = fractions.bounds(len);
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }

    /// The whole corridor as a closed gap, used when nothing is drivable.
    pub fn as_gap(&self) -> Gap {
        Gap::new(self.start, self.end.saturating_sub(1).max(self.start))
    }
}

/// Closed index range around the nearest obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bubble {
    pub nearest: usize,
    pub start: usize,
    pub end: usize,
}

impl Bubble {
    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Result of preprocessing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub ranges: Vec<f32>,
    /// Surviving gap candidates, ascending.
    pub gaps: Vec<usize>,
    pub bubble: Option<Bubble>,
    pub corridor: Corridor,
}

// LiDAR preprocessing
pub struct RangeFramePreprocessor {
    bubble_penalty: f32,
    corridor: CorridorFractions,
}

impl RangeFramePreprocessor {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            bubble_penalty: tuning.bubble_penalty,
            corridor: tuning.corridor,
        }
    }

    /// Build the working distance buffer and the gap candidates for `frame`.
    pub fn process(&self, frame: &RangeFrame, params: &ControlParameters) -> Preprocessed {
        let mut ranges = frame.ranges.clone();
        let window_half = params.window_half;
        let level = params.max_actionable_dist;

        // 1. non-finite readings are open space
        Self::clean_invalid_ranges(&mut ranges);

        // 2. threshold the windowed mean, then claim the open windows
        let candidates = Self::find_candidates(&ranges, window_half, level);
        Self::claim_free_space(&mut ranges, &candidates, window_half, level);

        // 3. disparity bubble around the nearest obstacle
        let bubble = self.apply_bubble(&mut ranges, params.disparity_extender);

        // 4. blind zone
        let corridor = Corridor::for_len(ranges.len(), &self.corridor);
        Self::mask_blind_zone(&mut ranges, corridor);

        // 5. drop candidates the masks removed
        let gaps = candidates
            .into_iter()
            .filter(|&i| corridor.contains(i) && !bubble.is_some_and(|b| b.contains(i)))
            .collect();

        Preprocessed {
            ranges,
            gaps,
            bubble,
            corridor,
        }
    }

    fn clean_invalid_ranges(ranges: &mut [f32]) {
        for range in ranges.iter_mut().filter(|r| !r.is_finite()) {
            *range = f32::INFINITY;
        }
    }

    /// Indices whose centred `2·window_half+1` mean exceeds `level`.
    fn find_candidates(ranges: &[f32], window_half: usize, level: f32) -> Vec<usize> {
        let window_len = window_half.saturating_mul(2).saturating_add(1) as f32;
        let last = ranges.len().saturating_sub(window_half);

        (window_half..last)
            .filter(|&i| {
                let sum: f32 = ranges[i - window_half..=i + window_half].iter().sum();
                sum / window_len > level
            })
            .collect()
    }

    /// Lower `[i - window_half, i + window_half)` to `level` around each candidate.
    /// Readings already nearer than `level` are kept.
    fn claim_free_space(ranges: &mut [f32], candidates: &[usize], window_half: usize, level: f32) {
        let len = ranges.len();
        for &i in candidates {
            let start = i.saturating_sub(window_half);
            let end = i.saturating_add(window_half).min(len);
            for range in &mut ranges[start..end] {
                *range = range.min(level);
            }
        }
    }

    fn find_closest_obstacle(ranges: &[f32]) -> Option<usize> {
        ranges
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(idx, _)| idx)
    }

    fn apply_bubble(&self, ranges: &mut [f32], extender: usize) -> Option<Bubble> {
        let nearest = Self::find_closest_obstacle(ranges)?;
        let bubble = Bubble {
            nearest,
            start: nearest.saturating_sub(extender),
            end: nearest.saturating_add(extender).min(ranges.len() - 1),
        };

        for range in &mut ranges[bubble.start..=bubble.end] {
            *range -= self.bubble_penalty;
        }
        for range in ranges.iter_mut().filter(|r| **r < 0.0) {
            *range = 0.0;
        }

        Some(bubble)
    }

    fn mask_blind_zone(ranges: &mut [f32], corridor: Corridor) {
        let end = corridor.end.min(ranges.len());
        ranges[..corridor.start.min(end)].fill(0.0);
        ranges[end..].fill(0.0);
    }
}

/// Closed interval of drivable indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start_idx: usize,
    pub end_idx: usize,
    pub size: usize,
}

impl Gap {
    pub fn new(start_idx: usize, end_idx: usize) -> Self {
        Self {
            start_idx,
            end_idx,
            size: end_idx - start_idx + 1,
        }
    }

    pub fn center(&self) -> usize {
        (self.start_idx + self.end_idx) / 2
    }
}

// Gap extraction
pub struct GapExtractor {
    corridor: CorridorFractions,
}

impl GapExtractor {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            corridor: tuning.corridor,
        }
    }

    /// Widest run of consecutive indices. Equal widths go to the run found
    /// first. With no indices, the front corridor of a `len`-sample frame.
    pub fn find_max_gap(&self, indices: &[usize], len: usize) -> Gap {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let Some((&first, rest)) = sorted.split_first() else {
            debug!("No gap found, falling back to the front corridor");
            return Corridor::for_len(len, &self.corridor).as_gap();
        };

        let mut max_gap = Gap::new(first, first);
        let mut start = first;
        let mut prev = first;

        for &curr in rest {
            if curr != prev + 1 {
                Self::keep_wider(&mut max_gap, Gap::new(start, prev));
                start = curr;
            }
            prev = curr;
        }
        Self::keep_wider(&mut max_gap, Gap::new(start, prev));

        max_gap
    }

    fn keep_wider(max_gap: &mut Gap, candidate: Gap) {
        if candidate.size > max_gap.size {
            *max_gap = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn frame(ranges: Vec<f32>) -> RangeFrame {
        let increment = 2.0 * PI / ranges.len() as f32;
        let angle_max = -PI + (ranges.len() - 1) as f32 * increment;
        RangeFrame::new(ranges, -PI, angle_max, increment)
    }

    fn params(window_half: usize, disparity_extender: usize) -> ControlParameters {
        ControlParameters {
            throttle: 0.2,
            window_half,
            disparity_extender,
            max_actionable_dist: 2.0,
        }
    }

    fn extractor() -> GapExtractor {
        GapExtractor::new(&Tuning::default())
    }

    #[test]
    fn validate_accepts_consistent_frame() {
        assert_eq!(frame(vec![1.0; 1080]).validate(Some(1080)), Ok(()));
    }

    #[test]
    fn validate_rejects_malformed_frames() {
        let empty = RangeFrame::new(vec![], -PI, PI, 0.01);
        assert_eq!(empty.validate(None), Err(FrameError::Empty));

        let mut bad = frame(vec![1.0; 100]);
        bad.angle_increment = 0.0;
        assert_eq!(bad.validate(None), Err(FrameError::InvalidIncrement(0.0)));

        let mut bad = frame(vec![1.0; 100]);
        bad.angle_min = f32::NAN;
        assert!(matches!(bad.validate(None), Err(FrameError::InvalidBounds { .. })));

        let mut bad = frame(vec![1.0; 100]);
        bad.ranges.truncate(50);
        assert!(matches!(
            bad.validate(None),
            Err(FrameError::InconsistentLength { actual: 50, .. })
        ));

        assert_eq!(
            frame(vec![1.0; 720]).validate(Some(1080)),
            Err(FrameError::UnexpectedLength {
                expected: 1080,
                actual: 720
            })
        );
    }

    #[test]
    fn index_of_inverts_angle_at() {
        let f = frame(vec![1.0; 1080]);
        assert_eq!(f.index_of(f.angle_at(540)), 540);
        assert_eq!(f.index_of(f.angle_at(0)), 0);
        assert!(f.index_of(-2.0 * PI) < 0);
    }

    #[test]
    fn index_of_truncates_between_samples() {
        let f = frame(vec![1.0; 1080]);
        let between = f.angle_at(533) + 0.6 * f.angle_increment;
        assert_eq!(f.index_of(between), 533);

        let just_below = f.angle_at(534) - 0.1 * f.angle_increment;
        assert_eq!(f.index_of(just_below), 533);
    }

    #[test]
    fn huge_window_does_not_overflow() {
        let pre = RangeFramePreprocessor::new(&Tuning::default());
        let out = pre.process(&frame(vec![5.0; 1080]), &params(usize::MAX, 50));
        assert!(out.gaps.is_empty());
    }

    #[test]
    fn open_frame_yields_whole_corridor() {
        let pre = RangeFramePreprocessor::new(&Tuning::default());
        let out = pre.process(&frame(vec![5.0; 1080]), &params(40, 50));

        assert_eq!(
            out.corridor,
            Corridor {
                start: 180,
                end: 900
            }
        );
        assert_eq!(out.gaps, (180..900).collect::<Vec<_>>());
        assert!(out.ranges[..180].iter().all(|&r| r == 0.0));
        assert!(out.ranges[900..].iter().all(|&r| r == 0.0));
        assert!(out.ranges[180..900].iter().all(|&r| r == 2.0));
    }

    #[test]
    fn near_frame_has_no_candidates() {
        let pre = RangeFramePreprocessor::new(&Tuning::default());
        let out = pre.process(&frame(vec![1.0; 1080]), &params(40, 50));
        assert!(out.gaps.is_empty());
    }

    #[test]
    fn bubble_surrounds_nearest_obstacle() {
        let mut ranges = vec![5.0; 1080];
        ranges[540] = 0.5;

        let pre = RangeFramePreprocessor::new(&Tuning::default());
        let out = pre.process(&frame(ranges), &params(40, 50));

        assert_eq!(
            out.bubble,
            Some(Bubble {
                nearest: 540,
                start: 490,
                end: 590
            })
        );
        assert_eq!(out.ranges[540], 0.0);
        assert_eq!(out.ranges[500], 0.5);
        assert!(out.gaps.iter().all(|&i| !(490..=590).contains(&i)));
        assert!(out.gaps.contains(&489));
        assert!(out.gaps.contains(&591));
    }

    #[test]
    fn bubble_is_clamped_at_buffer_edges() {
        let mut ranges = vec![5.0; 100];
        ranges[3] = 0.1;

        let pre = RangeFramePreprocessor::new(&Tuning::default());
        let out = pre.process(&frame(ranges), &params(2, 10));

        let bubble = out.bubble.unwrap();
        assert_eq!((bubble.start, bubble.end), (0, 13));
    }

    #[test]
    fn window_wider_than_frame_yields_no_candidates() {
        let pre = RangeFramePreprocessor::new(&Tuning::default());
        let out = pre.process(&frame(vec![5.0; 12]), &params(40, 2));
        assert!(out.gaps.is_empty());
        assert_eq!(out.ranges.len(), 12);
    }

    #[test]
    fn non_finite_readings_count_as_open_space() {
        let mut ranges = vec![5.0; 1080];
        for r in &mut ranges[300..400] {
            *r = f32::NAN;
        }
        ranges[600] = f32::NEG_INFINITY;

        let pre = RangeFramePreprocessor::new(&Tuning::default());
        let out = pre.process(&frame(ranges), &params(40, 50));

        assert!((300..400).all(|i| out.gaps.contains(&i)));
        assert!(out.gaps.contains(&600));
        assert!(out.ranges.iter().all(|r| !r.is_nan()));
    }

    #[test]
    fn max_gap_merges_consecutive_runs() {
        let gap = extractor().find_max_gap(&[1, 2, 3, 10, 11, 12, 13, 14, 20], 1080);
        assert_eq!(gap, Gap::new(10, 14));
        assert_eq!(gap.size, 5);
    }

    #[test]
    fn max_gap_accepts_unordered_input() {
        let gap = extractor().find_max_gap(&[13, 2, 11, 3, 10, 1, 12], 1080);
        assert_eq!(gap, Gap::new(10, 13));
    }

    #[test]
    fn max_gap_tie_goes_to_first_run() {
        let gap = extractor().find_max_gap(&[50, 51, 52, 7, 8, 9], 1080);
        assert_eq!(gap, Gap::new(7, 9));

        let gap = extractor().find_max_gap(&[4, 30], 1080);
        assert_eq!(gap, Gap::new(4, 4));
    }

    #[test]
    fn empty_candidates_fall_back_to_corridor() {
        assert_eq!(extractor().find_max_gap(&[], 1080), Gap::new(180, 899));
        assert_eq!(extractor().find_max_gap(&[], 720), Gap::new(120, 599));
    }

    #[test]
    fn fallback_follows_configured_fractions() {
        let tuning = Tuning {
            corridor: CorridorFractions {
                start_num: 1,
                end_num: 3,
                denominator: 4,
            },
            ..Tuning::default()
        };
        let gap = GapExtractor::new(&tuning).find_max_gap(&[], 1000);
        assert_eq!(gap, Gap::new(250, 749));
    }
}
