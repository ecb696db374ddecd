//! Heading-corrected motion control for the Cutebot Pro two-wheeled robot on
//! no-std embedded platforms.
//!
//! For a host-side simulation, see the `cbp-app/mock-mcu` binary.
#![no_std]

pub mod utils;
