//! Straight-line heading hold.
//!
//! Drives at a fixed speed while a PID loop steers against heading drift
//! reported by the orientation source. The heading held is whatever the
//! robot faced when motion began, not an absolute bearing.

use embassy_time::{Duration, Instant};

use super::{
    Clock, Direction, DriveContext, DriveError, MotorActuator, OrientationSource, SpeedGovernor,
    StepOutcome, REFERENCE_WHEEL,
};
use crate::utils::math::{heading::shortest_signed_delta, kinematics::DistanceUnit, pid::HeadingPid};

/// Per-invocation state of a heading-hold drive.
#[derive(Debug, Clone)]
pub struct HeadingHold {
    governor: SpeedGovernor,
    pid: HeadingPid,
    target_heading: f32,
    /// Clamped speed magnitude.
    speed: f32,
    direction: Direction,
    /// Rotation-unit target on the reference wheel, `None` to hold until
    /// cancelled or timed out.
    target_rotation: Option<f32>,
    started_at: Instant,
    timeout: Duration,
    steps: u32,
}

impl HeadingHold {
    /// Prepare a heading-hold drive.
    ///
    /// Raises the cancellation flag, initialises (on first use) and calibrates
    /// the orientation source, resets the reference wheel's distance counter
    /// and records the heading to hold. If the orientation source cannot be
    /// initialised, returns `DriveError::OrientationUnavailable` before any
    /// motor command is sent.
    pub fn begin<M, O, C>(
        ctx: &mut DriveContext<M, O>,
        clock: &C,
        speed: f32,
        direction: Direction,
        distance: Option<(f32, DistanceUnit)>,
    ) -> Result<Self, DriveError<M::Error, O::Error>>
    where
        M: MotorActuator,
        O: OrientationSource,
        C: Clock,
    {
        ctx.request_stop();
        if !ctx.ensure_orientation() {
            return Err(DriveError::OrientationUnavailable);
        }
        ctx.imu
            .calibrate(ctx.config.calibration_secs)
            .map_err(DriveError::Orientation)?;

        let governor = ctx.governor();
        let speed = libm::fabsf(governor.clamp(speed));
        let geometry = ctx.config.geometry();
        let target_rotation = distance.map(|(d, unit)| {
            geometry.rotation_target(libm::fabsf(d), unit, ctx.config.distance_trim)
        });

        ctx.motors
            .clear_distance(REFERENCE_WHEEL)
            .map_err(DriveError::Motor)?;
        let target_heading = ctx.imu.heading().map_err(DriveError::Orientation)?;

        ctx.clear_stop();
        tracing::info!(speed, ?direction, ?target_rotation, target_heading, "Heading hold started");

        Ok(Self {
            governor,
            pid: HeadingPid::new(ctx.config.gains, ctx.config.integral_step_limit),
            target_heading,
            speed,
            direction,
            target_rotation,
            started_at: clock.now(),
            timeout: ctx.config.straight_timeout(),
            steps: 0,
        })
    }

    /// Run one control iteration.
    pub fn step<M, O>(
        &mut self,
        ctx: &mut DriveContext<M, O>,
        now: Instant,
    ) -> StepOutcome
    where
        M: MotorActuator,
        O: OrientationSource,
    {
        if ctx.stop_requested() {
            return self.finish(ctx, StepOutcome::Aborted);
        }
        if now.saturating_duration_since(self.started_at) >= self.timeout {
            return self.finish(ctx, StepOutcome::TimedOut);
        }

        if let Some(target) = self.target_rotation {
            match ctx.motors.distance(REFERENCE_WHEEL) {
                Ok(d) if d * self.direction.modifier() >= target => {
                    return self.finish(ctx, StepOutcome::Done);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(?e, "Distance read failed");
                    return self.finish(ctx, StepOutcome::Aborted);
                }
            }
        }

        let heading = match ctx.imu.heading() {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(?e, "Heading read failed");
                return self.finish(ctx, StepOutcome::Aborted);
            }
        };

        let error = shortest_signed_delta(heading, self.target_heading);
        let correction = self.pid.update(error);
        let (base_left, base_right) = self.governor.apply_steering_trim(self.speed, self.direction);
        let left = self.governor.limit_wheel(base_left + correction, self.direction);
        let right = self.governor.limit_wheel(base_right - correction, self.direction);

        if let Err(e) = ctx.motors.set_speeds(left, right) {
            tracing::error!(?e, "Speed command failed");
            return self.finish(ctx, StepOutcome::Aborted);
        }
        self.steps += 1;
        tracing::trace!(heading, error, correction, left, right, "Heading hold step");
        StepOutcome::Continue
    }

    fn finish<M, O>(
        &self,
        ctx: &mut DriveContext<M, O>,
        outcome: StepOutcome,
    ) -> StepOutcome
    where
        M: MotorActuator,
        O: OrientationSource,
    {
        ctx.all_stop();
        tracing::info!(?outcome, steps = self.steps, "Heading hold finished");
        outcome
    }

    pub fn target_heading(&self) -> f32 {
        self.target_heading
    }

    pub fn target_rotation(&self) -> Option<f32> {
        self.target_rotation
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
