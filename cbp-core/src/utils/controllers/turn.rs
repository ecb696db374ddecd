//! In-place turns.
//!
//! Two strategies share one interface:
//!
//! - [`GyroTurn`]: spins the wheels in opposite directions and watches the
//!   orientation source until the turned angle reaches the (overshoot-scaled)
//!   target.
//! - [`BusTurn`]: hands the angle to the motor board's own turn command and
//!   waits for the reference wheel to stand still. Used when no inertial
//!   feedback is wanted or available.

use embassy_time::{Duration, Instant};

use super::{
    Clock, Direction, DriveContext, DriveError, MotorActuator, OrientationSource, StepOutcome,
    TurnSide, REFERENCE_WHEEL,
};
use crate::utils::math::heading::TurnProgress;

/// Reported wheel speeds below this magnitude count as standing still.
const STILL_THRESHOLD: f32 = 0.5;

/// A turn in progress, with either strategy.
#[derive(Debug, Clone)]
pub enum Turn {
    Gyro(GyroTurn),
    Bus(BusTurn),
}

impl Turn {
    /// Prepare a turn of `angle` degrees towards `side`.
    ///
    /// A negative angle turns the other way. `gyro` selects the
    /// orientation-corrected strategy.
    pub fn begin<M, O, C>(
        ctx: &mut DriveContext<M, O>,
        clock: &C,
        speed: f32,
        side: TurnSide,
        angle: f32,
        gyro: bool,
    ) -> Result<Self, DriveError<M::Error, O::Error>>
    where
        M: MotorActuator,
        O: OrientationSource,
        C: Clock,
    {
        let (side, angle) = if angle < 0.0 {
            (side.opposite(), -angle)
        } else {
            (side, angle)
        };
        if gyro {
            GyroTurn::begin(ctx, clock, speed, side, angle).map(Turn::Gyro)
        } else {
            BusTurn::begin(ctx, clock, side, angle).map(Turn::Bus)
        }
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
        match self {
            Turn::Gyro(t) => t.step(ctx, now),
            Turn::Bus(t) => t.step(ctx, now),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Motors stopped, waiting for the chassis to come to rest.
    Settling { until: Instant },
    Turning(TurnProgress),
}

/// Orientation-corrected in-place turn.
#[derive(Debug, Clone)]
pub struct GyroTurn {
    side: TurnSide,
    /// Angle to turn after overshoot scaling.
    target: f32,
    left: f32,
    right: f32,
    phase: Phase,
    started_at: Instant,
    timeout: Duration,
}

impl GyroTurn {
    pub fn begin<M, O, C>(
        ctx: &mut DriveContext<M, O>,
        clock: &C,
        speed: f32,
        side: TurnSide,
        angle: f32,
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
        let (l, r) = governor.apply_steering_trim(speed, Direction::Forward);
        let (left, right) = match side {
            TurnSide::Right => (l, -r),
            TurnSide::Left => (-l, r),
        };
        let target = libm::fabsf(angle) * ctx.config.turn_overshoot_factor;

        ctx.motors.stop_all().map_err(DriveError::Motor)?;
        ctx.clear_stop();
        let now = clock.now();
        tracing::info!(?side, angle, target, left, right, "Gyro turn started");

        Ok(Self {
            side,
            target,
            left,
            right,
            phase: Phase::Settling {
                until: now + ctx.config.turn_settle(),
            },
            started_at: now,
            timeout: ctx.config.turn_timeout(),
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
        if ctx.stop_requested() {
            return self.finish(ctx, StepOutcome::Aborted);
        }
        if now.saturating_duration_since(self.started_at) >= self.timeout {
            return self.finish(ctx, StepOutcome::TimedOut);
        }

        let heading = match self.phase {
            Phase::Settling { until } if now < until => return StepOutcome::Continue,
            _ => match ctx.imu.heading() {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(?e, "Heading read failed");
                    return self.finish(ctx, StepOutcome::Aborted);
                }
            },
        };

        match self.phase {
            Phase::Settling { .. } => {
                tracing::debug!(start_heading = heading, "Turn settled");
                self.phase = Phase::Turning(TurnProgress::new(self.side, heading));
                if self.target <= 0.0 {
                    return self.finish(ctx, StepOutcome::Done);
                }
                if let Err(e) = ctx.motors.set_speeds(self.left, self.right) {
                    tracing::error!(?e, "Speed command failed");
                    return self.finish(ctx, StepOutcome::Aborted);
                }
                StepOutcome::Continue
            }
            Phase::Turning(mut progress) => {
                let change = progress.update(heading);
                self.phase = Phase::Turning(progress);
                tracing::trace!(heading, change, "Gyro turn step");
                if change >= self.target {
                    self.finish(ctx, StepOutcome::Done)
                } else {
                    StepOutcome::Continue
                }
            }
        }
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
        tracing::info!(?outcome, turned = self.turned(), "Gyro turn finished");
        outcome
    }

    /// Angle turned so far, zero while settling.
    pub fn turned(&self) -> f32 {
        match self.phase {
            Phase::Settling { .. } => 0.0,
            Phase::Turning(p) => p.change(),
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn wheel_speeds(&self) -> (f32, f32) {
        (self.left, self.right)
    }
}

/// Turn executed by the motor board's own turn command.
#[derive(Debug, Clone)]
pub struct BusTurn {
    units: u16,
    started_at: Instant,
    timeout: Duration,
    still_for: Duration,
    still_since: Option<Instant>,
}

impl BusTurn {
    pub fn begin<M, O, C>(
        ctx: &mut DriveContext<M, O>,
        clock: &C,
        side: TurnSide,
        angle: f32,
    ) -> Result<Self, DriveError<M::Error, O::Error>>
    where
        M: MotorActuator,
        O: OrientationSource,
        C: Clock,
    {
        ctx.request_stop();
        let units = ctx.config.bus_turn_units(libm::fabsf(angle));
        ctx.motors.turn_by(side, units).map_err(DriveError::Motor)?;
        ctx.clear_stop();
        tracing::info!(?side, angle, units, "Bus turn started");

        Ok(Self {
            units,
            started_at: clock.now(),
            timeout: ctx.config.turn_timeout(),
            still_for: ctx.config.bus_turn_still(),
            still_since: None,
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
        if ctx.stop_requested() {
            return self.finish(ctx, StepOutcome::Aborted);
        }
        if now.saturating_duration_since(self.started_at) >= self.timeout {
            return self.finish(ctx, StepOutcome::TimedOut);
        }

        let speed = match ctx.motors.speed(REFERENCE_WHEEL) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(?e, "Wheel speed read failed");
                return self.finish(ctx, StepOutcome::Aborted);
            }
        };

        if libm::fabsf(speed) < STILL_THRESHOLD {
            let since = *self.still_since.get_or_insert(now);
            if now.saturating_duration_since(since) >= self.still_for {
                return self.finish(ctx, StepOutcome::Done);
            }
        } else {
            self.still_since = None;
        }
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
        tracing::info!(?outcome, units = self.units, "Bus turn finished");
        outcome
    }

    pub fn units(&self) -> u16 {
        self.units
    }
}
