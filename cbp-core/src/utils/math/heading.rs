//! Circular heading arithmetic.
//!
//! Headings are compass-style degrees in `[0, 360)`, increasing clockwise
//! when viewed from above. All functions here are pure so the wrap handling
//! can be tested without hardware.
//!
//! # Example
//! ```rust
//! use cbp_core::utils::math::heading::shortest_signed_delta;
//! assert_eq!(shortest_signed_delta(350.0, 10.0), 20.0);
//! assert_eq!(shortest_signed_delta(10.0, 350.0), -20.0);
//! ```

use crate::utils::controllers::TurnSide;

/// Fold any angle into `[0, 360)`.
pub fn normalize(degrees: f32) -> f32 {
    let wrapped = libm::fmodf(degrees, 360.0);
    let wrapped = if wrapped < 0.0 { wrapped + 360.0 } else { wrapped };
    // -1e-6 + 360.0 rounds to 360.0 in f32
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed rotation from `from` to `to`, in `(-180, 180]`.
///
/// Positive means `to` lies clockwise of `from`. An exact half turn is
/// reported as `+180`.
pub fn shortest_signed_delta(
    from: f32,
    to: f32,
) -> f32 {
    let delta = libm::fmodf(to - from, 360.0);
    if delta > 180.0 {
        delta - 360.0
    } else if delta <= -180.0 {
        delta + 360.0
    } else {
        delta
    }
}

/// Monotonic progress of an in-place turn.
///
/// Successive heading samples are unwrapped through
/// [`shortest_signed_delta`], so crossing 0°/360° never shows up as a jump of
/// ±360. The reported change is positive in the commanded turn direction and
/// negative when the robot drifts the other way. Samples must be close enough
/// together that the robot turns less than half a revolution between them.
#[derive(Debug, Clone, Copy)]
pub struct TurnProgress {
    side: TurnSide,
    start: f32,
    last: f32,
    turned: f32,
}

impl TurnProgress {
    /// Start tracking from `start_heading`.
    pub fn new(
        side: TurnSide,
        start_heading: f32,
    ) -> Self {
        let start = normalize(start_heading);
        Self {
            side,
            start,
            last: start,
            turned: 0.0,
        }
    }

    /// Feed a new heading sample and return the accumulated change.
    pub fn update(
        &mut self,
        heading: f32,
    ) -> f32 {
        let heading = normalize(heading);
        let step = shortest_signed_delta(self.last, heading);
        self.last = heading;
        self.turned += match self.side {
            TurnSide::Right => step,
            TurnSide::Left => -step,
        };
        self.turned
    }

    /// Accumulated change in the commanded direction.
    pub fn change(&self) -> f32 {
        self.turned
    }

    /// Heading recorded when tracking started.
    pub fn start_heading(&self) -> f32 {
        self.start
    }
}
