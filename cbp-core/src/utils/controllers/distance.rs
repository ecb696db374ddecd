//! Open-loop distance run.
//!
//! The motor board can drive a fixed number of centimetres by itself. The
//! board gives no completion signal, so the run is considered finished after
//! a wait derived from the distance.

use embassy_time::{Duration, Instant};

use super::{
    Clock, Direction, DriveContext, DriveError, MotorActuator, OrientationSource, StepOutcome,
};
use crate::utils::math::kinematics::DistanceUnit;

/// Runs longer than this many centimetres get overshoot compensation.
const COMPENSATION_THRESHOLD_CM: f32 = 3.0;

/// Nominal board speed used to estimate the run time (cm/s).
const RUN_SPEED_CM_PER_S: u64 = 20;

/// Extra wait after the estimated run time.
const RUN_TAIL: Duration = Duration::from_millis(800);

/// Centimetre value sent to the board for a requested distance.
///
/// The board overshoots by roughly 1 cm plus 1 cm per 50 cm, so longer runs
/// are shortened by that amount. The result saturates to one byte.
pub fn compensated_cm(distance_cm: f32) -> u8 {
    let mut cm = libm::fabsf(distance_cm);
    if cm > COMPENSATION_THRESHOLD_CM {
        cm -= libm::floorf(cm / 50.0) + 1.0;
    }
    libm::floorf(cm).clamp(0.0, u8::MAX as f32) as u8
}

/// Time the board needs for a run of `cm` centimetres.
pub fn run_duration(cm: u8) -> Duration {
    Duration::from_millis(cm as u64 * 1000 / RUN_SPEED_CM_PER_S) + RUN_TAIL
}

#[derive(Debug, Clone)]
pub struct BusDistanceRun {
    cm: u8,
    until: Instant,
}

impl BusDistanceRun {
    pub fn begin<M, O, C>(
        ctx: &mut DriveContext<M, O>,
        clock: &C,
        direction: Direction,
        distance: f32,
        unit: DistanceUnit,
    ) -> Result<Self, DriveError<M::Error, O::Error>>
    where
        M: MotorActuator,
        O: OrientationSource,
        C: Clock,
    {
        ctx.request_stop();
        ctx.motors.set_speeds(0.0, 0.0).map_err(DriveError::Motor)?;
        let cm = compensated_cm(unit.to_cm(distance));
        ctx.motors
            .run_distance(direction, cm)
            .map_err(DriveError::Motor)?;
        ctx.clear_stop();
        tracing::info!(?direction, distance, cm, "Distance run started");

        Ok(Self {
            cm,
            until: clock.now() + run_duration(cm),
        })
    }

    pub fn step<M, O>(
        &mut self,
        ctx: &mut DriveContext<M, O>,
        now: Instant,
    ) -> StepOutcome
    where
        M: MotorActuator,
        O: OrientationSource,
    {
        let outcome = if ctx.stop_requested() {
            StepOutcome::Aborted
        } else if now >= self.until {
            StepOutcome::Done
        } else {
            return StepOutcome::Continue;
        };
        ctx.all_stop();
        tracing::info!(?outcome, cm = self.cm, "Distance run finished");
        outcome
    }

    pub fn cm(&self) -> u8 {
        self.cm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_runs_are_not_compensated() {
        assert_eq!(compensated_cm(0.0), 0);
        assert_eq!(compensated_cm(3.0), 3);
    }

    #[test]
    fn long_runs_lose_overshoot() {
        assert_eq!(compensated_cm(10.0), 9);
        assert_eq!(compensated_cm(50.0), 48);
        assert_eq!(compensated_cm(120.0), 117);
    }

    #[test]
    fn compensated_value_saturates() {
        assert_eq!(compensated_cm(1000.0), 255);
    }

    #[test]
    fn run_time_scales_with_distance() {
        assert_eq!(run_duration(0), Duration::from_millis(800));
        assert_eq!(run_duration(20), Duration::from_millis(1800));
        assert_eq!(run_duration(9), Duration::from_millis(1250));
    }
}
