//! Speed governor.
//!
//! Maps requested speeds into the motor board's safe operating band and
//! splits the static steering trim across the two wheels.

use super::{config::DriveConfig, Direction};

/// Snapshot of the speed band and steering trim at the start of a command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedGovernor {
    min: f32,
    max: f32,
    steering_trim: f32,
}

impl SpeedGovernor {
    pub fn new(
        min: f32,
        max: f32,
        steering_trim: f32,
    ) -> Self {
        let (a, b) = (libm::fabsf(min), libm::fabsf(max));
        Self {
            min: a.min(b),
            max: a.max(b),
            steering_trim,
        }
    }

    pub fn from_config(cfg: &DriveConfig) -> Self {
        Self::new(cfg.min_speed, cfg.max_speed, cfg.steering_trim)
    }

    /// Clamp a requested speed into the band, keeping its sign.
    ///
    /// Zero and NaN map to `+min`. The mapping is idempotent.
    pub fn clamp(
        &self,
        requested: f32,
    ) -> f32 {
        if requested == 0.0 || requested.is_nan() {
            return self.min;
        }
        libm::copysignf(libm::fabsf(requested).clamp(self.min, self.max), requested)
    }

    /// Split the steering trim symmetrically around `speed` (a magnitude) and
    /// return signed `(left, right)` wheel speeds for `direction`.
    ///
    /// The trim sign flips in reverse so the same physical bias is corrected
    /// whichever way the robot travels.
    pub fn apply_steering_trim(
        &self,
        speed: f32,
        direction: Direction,
    ) -> (f32, f32) {
        let m = direction.modifier();
        let speed = libm::fabsf(speed);
        let half = speed * self.steering_trim / 200.0 * m;
        (m * (speed + half), m * (speed - half))
    }

    /// Limit one corrected wheel speed to `[0, max]` in the travel direction.
    ///
    /// A wheel is slowed to a standstill but never driven against the
    /// direction of travel.
    pub fn limit_wheel(
        &self,
        speed: f32,
        direction: Direction,
    ) -> f32 {
        match direction {
            Direction::Forward => speed.clamp(0.0, self.max),
            Direction::Reverse => speed.clamp(-self.max, 0.0),
        }
    }

    pub fn min_speed(&self) -> f32 {
        self.min
    }

    pub fn max_speed(&self) -> f32 {
        self.max
    }

    pub fn steering_trim(&self) -> f32 {
        self.steering_trim
    }
}
