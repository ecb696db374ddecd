//! Math utilities for the Cutebot Pro.
//!
//! Circular heading arithmetic, the heading-hold PID and differential drive
//! geometry.

pub mod heading;
pub mod kinematics;
pub mod pid;
