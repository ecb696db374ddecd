//! Drive geometry for the two-wheeled Cutebot Pro.
//!
//! The motor board reports odometry as cumulative wheel rotation in degrees
//! ("rotation units"). `DriveGeometry` converts travel distances into those
//! units and maps wheel rotation rates back to body motion.
//!
//! # Example
//! ```rust
//! use cbp_core::utils::math::kinematics::{DistanceUnit, DriveGeometry};
//! let geo = DriveGeometry::new(15.865, 9.0);
//! let target = geo.rotation_target(100.0, DistanceUnit::Cm, 0.0);
//! assert!((target - 2269.15).abs() < 0.1);
//! ```

use core::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Unit of a requested travel distance.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    #[default]
    Cm,
    Inch,
}

impl DistanceUnit {
    /// Convert `distance` in this unit to centimetres.
    pub fn to_cm(
        self,
        distance: f32,
    ) -> f32 {
        match self {
            DistanceUnit::Cm => distance,
            DistanceUnit::Inch => distance * 2.54,
        }
    }
}

/// Wheel and chassis dimensions of a differential drive.
#[derive(Debug, Clone, Copy)]
pub struct DriveGeometry {
    /// Wheel circumference (cm)
    wheel_circumference: f32,
    /// Distance between the wheel contact points (cm)
    track_width: f32,
}

impl DriveGeometry {
    pub fn new(
        wheel_circumference: f32,
        track_width: f32,
    ) -> Self {
        Self {
            wheel_circumference,
            track_width,
        }
    }

    /// Wheel rotation, in degrees, per centimetre travelled.
    pub fn degrees_per_cm(&self) -> f32 {
        360.0 / self.wheel_circumference
    }

    /// Rotation-unit target for a travel distance, scaled by the distance
    /// trim factor `(100 + trim) / 100`.
    pub fn rotation_target(
        &self,
        distance: f32,
        unit: DistanceUnit,
        distance_trim: f32,
    ) -> f32 {
        unit.to_cm(distance) * self.degrees_per_cm() * (100.0 + distance_trim) / 100.0
    }

    /// Recover body motion from wheel rotation rates (deg/s).
    ///
    /// # Returns
    ///
    /// `(v, yaw)` where `v` is forward speed in cm/s and `yaw` is the heading
    /// rate in deg/s, clockwise positive (left wheel faster turns right).
    pub fn body_rates(
        &self,
        left_dps: f32,
        right_dps: f32,
    ) -> (f32, f32) {
        let left = left_dps / self.degrees_per_cm();
        let right = right_dps / self.degrees_per_cm();
        let v = (left + right) / 2.0;
        let yaw = (left - right) / self.track_width * (180.0 / PI);
        (v, yaw)
    }
}
