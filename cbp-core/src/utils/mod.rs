//! Utility re-exports for the Cutebot Pro motion core.
//!
//! - `controllers`: drive/turn controllers, command sequencing and the I2C
//!   drivers for the motor board and the inertial sensor
//! - `math`: circular heading arithmetic, the heading PID and drive geometry

pub mod controllers;
pub mod math;

pub use controllers::runner::DriveController;
pub use controllers::{DriveCommand, DriveContext, StepOutcome, DRIVE_CHANNEL};
pub use embassy_time::{Duration, Instant};
pub use math::kinematics::DriveGeometry as dg;
