//! Drive configuration.
//!
//! Every tunable of the motion controllers lives in `DriveConfig`. Values are
//! set once (or changed through the configuration `DriveCommand`s) and apply
//! to every later drive command.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::utils::math::kinematics::DriveGeometry;

/// PID gains for the heading-hold loop.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.1,
            kd: 0.5,
        }
    }
}

/// Cutebot Pro wheel circumference (cm).
pub const WHEEL_CIRCUMFERENCE_CM: f32 = 15.865;

/// Bus turn command units per degree of requested rotation.
///
/// Empirical calibration of the motor board's turn command; the board does
/// not document it.
pub const BUS_TURN_UNITS_PER_DEGREE: f32 = 650.0 / 180.0;

/// Constant added to every bus turn command value.
pub const BUS_TURN_OFFSET: f32 = 4.0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    /// Lower bound of the speed band (percent).
    pub min_speed: f32,
    /// Upper bound of the speed band (percent).
    pub max_speed: f32,
    /// Steering trim (percent). Positive speeds up the left wheel.
    pub steering_trim: f32,
    /// Distance trim (percent) applied to rotation targets.
    pub distance_trim: f32,
    pub gains: PidGains,
    /// Cap on one cycle's contribution to the PID integral.
    pub integral_step_limit: f32,
    pub control_period_ms: u64,
    pub straight_timeout_ms: u64,
    pub turn_timeout_ms: u64,
    /// Scale applied to gyro turn targets to absorb mechanical overshoot.
    pub turn_overshoot_factor: f32,
    /// Pause between stopping and sampling the start heading of a turn.
    pub turn_settle_ms: u64,
    pub calibration_secs: u8,
    pub wheel_circumference_cm: f32,
    pub track_width_cm: f32,
    pub bus_turn_units_per_degree: f32,
    pub bus_turn_offset: f32,
    /// How long the reference wheel must read zero speed before a bus turn
    /// counts as finished.
    pub bus_turn_still_ms: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            min_speed: 20.0,
            max_speed: 50.0,
            steering_trim: 0.0,
            distance_trim: 0.0,
            gains: PidGains::default(),
            integral_step_limit: 10.0,
            control_period_ms: 10,
            straight_timeout_ms: 30_000,
            turn_timeout_ms: 5_000,
            turn_overshoot_factor: 0.95,
            turn_settle_ms: 100,
            calibration_secs: 1,
            wheel_circumference_cm: WHEEL_CIRCUMFERENCE_CM,
            track_width_cm: 9.0,
            bus_turn_units_per_degree: BUS_TURN_UNITS_PER_DEGREE,
            bus_turn_offset: BUS_TURN_OFFSET,
            bus_turn_still_ms: 1_000,
        }
    }
}

impl DriveConfig {
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms.max(1))
    }

    pub fn straight_timeout(&self) -> Duration {
        Duration::from_millis(self.straight_timeout_ms)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }

    pub fn turn_settle(&self) -> Duration {
        Duration::from_millis(self.turn_settle_ms)
    }

    pub fn bus_turn_still(&self) -> Duration {
        Duration::from_millis(self.bus_turn_still_ms)
    }

    pub fn geometry(&self) -> DriveGeometry {
        DriveGeometry::new(self.wheel_circumference_cm, self.track_width_cm)
    }

    /// Set the speed band. Bounds are taken as magnitudes and reordered if
    /// given the wrong way round.
    pub fn set_speed_bounds(
        &mut self,
        min: f32,
        max: f32,
    ) {
        let (a, b) = (libm::fabsf(min), libm::fabsf(max));
        self.min_speed = a.min(b);
        self.max_speed = a.max(b);
    }

    /// Convert a bus turn angle (degrees) into the board's command value.
    pub fn bus_turn_units(
        &self,
        angle: f32,
    ) -> u16 {
        let units = libm::roundf(angle * self.bus_turn_units_per_degree + self.bus_turn_offset);
        units.clamp(0.0, u16::MAX as f32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_robot() {
        let cfg = DriveConfig::default();
        assert_eq!(cfg.gains, PidGains { kp: 10.0, ki: 0.1, kd: 0.5 });
        assert_eq!(cfg.control_period(), Duration::from_millis(10));
        assert_eq!(cfg.straight_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.turn_overshoot_factor, 0.95);
    }

    #[test]
    fn speed_bounds_are_reordered() {
        let mut cfg = DriveConfig::default();
        cfg.set_speed_bounds(65.0, -15.0);
        assert_eq!(cfg.min_speed, 15.0);
        assert_eq!(cfg.max_speed, 65.0);
    }

    #[test]
    fn bus_turn_units_use_scale_and_offset() {
        let cfg = DriveConfig::default();
        assert_eq!(cfg.bus_turn_units(180.0), 654);
        assert_eq!(cfg.bus_turn_units(90.0), 329);
        assert_eq!(cfg.bus_turn_units(0.0), 4);
    }
}
