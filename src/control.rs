// ================================
// src/control.rs - target selection and steering output
// ================================
use crate::{
    config::{DampingTier, Tuning},
    lidar::{Gap, RangeFrame},
};

/// The one value carried from frame to frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub running_steering_angle: f32,
}

/// Chosen heading for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub index: usize,
    /// Index distance from the previous heading.
    pub delta: u64,
    pub scale: f32,
}

// Target selection with turn-rate damping
pub struct TargetSelector {
    damping_tiers: Vec<DampingTier>,
}

impl TargetSelector {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            damping_tiers: tuning.damping_tiers.clone(),
        }
    }

    /// Aim at the centre of `gap`, damped by how far that is from the previous heading.
    pub fn find_best_point(
        &self,
        gap: &Gap,
        frame: &RangeFrame,
        running_steering_angle: f32,
    ) -> Target {
        let running_idx = frame.index_of(running_steering_angle);
        let center = gap.center();
        let delta = (center as i64 - running_idx).unsigned_abs();

        Target {
            index: center,
            delta,
            scale: self.damping_scale(delta),
        }
    }

    /// Scale of the first tier covering `delta`; 1.0 past the last tier.
    pub fn damping_scale(&self, delta: u64) -> f32 {
        self.damping_tiers
            .iter()
            .find(|tier| delta <= tier.max_delta as u64)
            .map_or(1.0, |tier| tier.scale)
    }
}

// Steering output
pub struct SteeringMapper {
    steering_limit: f32,
}

impl SteeringMapper {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            steering_limit: tuning.steering_limit,
        }
    }

    /// Sensor angle of the target, scaled and clamped to the actuator range.
    pub fn steering_angle(&self, target: &Target, frame: &RangeFrame) -> f32 {
        let angle = frame.angle_at(target.index) * target.scale;
        angle.clamp(-self.steering_limit, self.steering_limit)
    }
}
