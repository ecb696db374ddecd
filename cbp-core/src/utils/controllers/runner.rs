//! Command sequencing and control-loop drivers.
//!
//! `DriveController` owns the drive context and at most one running motion.
//! Every motion command first pre-empts the running one (cancellation flag
//! plus one final step, which all-stops), then starts its own loop. There is
//! no queue: the newest command always wins.
//!
//! Two drivers call `tick` at the control period:
//! - [`DriveController::run_blocking`] with an `embedded_hal` delay, bounded
//!   by a step budget so it terminates even if the clock never advances
//! - [`DriveController::run`], an async task fed by [`DRIVE_CHANNEL`]

use embassy_time::{Duration, Timer};
use embedded_hal::delay::DelayNs;

use super::{
    distance::{run_duration, BusDistanceRun},
    straight::HeadingHold,
    turn::Turn,
    Clock, Direction, DriveCommand, DriveContext, DriveError, MotorActuator, OrientationSource,
    PidGains, StepOutcome, TurnSide, DRIVE_CHANNEL,
};
use crate::utils::math::kinematics::DistanceUnit;

/// The motion currently owning the actuator.
#[derive(Debug, Clone)]
pub enum Motion {
    Straight(HeadingHold),
    Turn(Turn),
    Distance(BusDistanceRun),
}

impl Motion {
    pub fn step<M, O>(
        &mut self,
        ctx: &mut DriveContext<M, O>,
        now: embassy_time::Instant,
    ) -> StepOutcome
    where
        M: MotorActuator,
        O: OrientationSource,
    {
        match self {
            Motion::Straight(m) => m.step(ctx, now),
            Motion::Turn(m) => m.step(ctx, now),
            Motion::Distance(m) => m.step(ctx, now),
        }
    }
}

pub struct DriveController<M, O, C> {
    ctx: DriveContext<M, O>,
    clock: C,
    active: Option<Motion>,
}

impl<M, O, C> DriveController<M, O, C>
where
    M: MotorActuator,
    O: OrientationSource,
    C: Clock,
{
    pub fn new(
        ctx: DriveContext<M, O>,
        clock: C,
    ) -> Self {
        Self {
            ctx,
            clock,
            active: None,
        }
    }

    pub fn context(&self) -> &DriveContext<M, O> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DriveContext<M, O> {
        &mut self.ctx
    }

    pub fn active(&self) -> Option<&Motion> {
        self.active.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Cancel the running motion, letting it run its final (stopping) step.
    fn preempt(&mut self) {
        if let Some(mut motion) = self.active.take() {
            self.ctx.request_stop();
            let outcome = motion.step(&mut self.ctx, self.clock.now());
            tracing::info!(?outcome, "Running motion pre-empted");
        }
    }

    /// Heading-hold drive for `distance`, or until cancelled when `None`.
    pub fn drive_straight(
        &mut self,
        speed: f32,
        direction: Direction,
        distance: Option<(f32, DistanceUnit)>,
    ) -> Result<(), DriveError<M::Error, O::Error>> {
        self.preempt();
        let hold = HeadingHold::begin(&mut self.ctx, &self.clock, speed, direction, distance)?;
        self.active = Some(Motion::Straight(hold));
        Ok(())
    }

    pub fn turn(
        &mut self,
        speed: f32,
        side: TurnSide,
        angle: f32,
        gyro: bool,
    ) -> Result<(), DriveError<M::Error, O::Error>> {
        self.preempt();
        let turn = Turn::begin(&mut self.ctx, &self.clock, speed, side, angle, gyro)?;
        self.active = Some(Motion::Turn(turn));
        Ok(())
    }

    pub fn drive_distance(
        &mut self,
        direction: Direction,
        distance: f32,
        unit: DistanceUnit,
    ) -> Result<(), DriveError<M::Error, O::Error>> {
        self.preempt();
        let run = BusDistanceRun::begin(&mut self.ctx, &self.clock, direction, distance, unit)?;
        self.active = Some(Motion::Distance(run));
        Ok(())
    }

    /// Cancel any running motion and stop the motors.
    pub fn stop(&mut self) {
        self.preempt();
        self.ctx.all_stop();
    }

    /// Execute a `DriveCommand`.
    ///
    /// Motion commands replace the running motion; configuration commands
    /// apply to the next motion and leave the running one alone.
    pub fn submit(
        &mut self,
        command: DriveCommand,
    ) -> Result<(), DriveError<M::Error, O::Error>> {
        match command {
            DriveCommand::Straight {
                speed,
                direction,
                distance,
                unit,
            } => self.drive_straight(speed, direction, distance.map(|d| (d, unit))),
            DriveCommand::Turn {
                speed,
                side,
                angle,
                gyro,
            } => self.turn(speed, side, angle, gyro),
            DriveCommand::Distance {
                direction,
                distance,
                unit,
            } => self.drive_distance(direction, distance, unit),
            DriveCommand::Stop => {
                self.stop();
                Ok(())
            }
            DriveCommand::SteeringCorrection { percent } => {
                self.ctx.set_steering_correction(percent);
                Ok(())
            }
            DriveCommand::DistanceCorrection { percent } => {
                self.ctx.set_distance_correction(percent);
                Ok(())
            }
            DriveCommand::SpeedBounds { min, max } => {
                self.ctx.set_speed_bounds(min, max);
                Ok(())
            }
            DriveCommand::Gains { kp, ki, kd } => {
                self.ctx.set_gains(PidGains { kp, ki, kd });
                Ok(())
            }
        }
    }

    /// Step the running motion once. Returns `None` when idle.
    pub fn tick(&mut self) -> Option<StepOutcome> {
        let motion = self.active.as_mut()?;
        let outcome = motion.step(&mut self.ctx, self.clock.now());
        if outcome.is_finished() {
            self.active = None;
        }
        Some(outcome)
    }

    /// Upper bound on the number of periods any motion may take.
    fn step_budget(&self) -> u32 {
        let cfg = &self.ctx.config;
        let longest = [
            cfg.straight_timeout(),
            cfg.turn_timeout() + cfg.turn_settle(),
            run_duration(u8::MAX),
        ]
        .into_iter()
        .max()
        .unwrap_or(Duration::from_secs(30));
        let periods = longest.as_millis() / cfg.control_period().as_millis();
        (periods.saturating_mul(2).saturating_add(16)).min(u32::MAX as u64) as u32
    }

    /// Execute `command` and drive its loop to completion on this thread.
    ///
    /// Configuration commands complete immediately with `Done` and leave a
    /// running motion untouched. If the step budget runs out first, the
    /// motors are stopped and `TimedOut` returned.
    pub fn run_blocking<D: DelayNs>(
        &mut self,
        command: DriveCommand,
        delay: &mut D,
    ) -> Result<StepOutcome, DriveError<M::Error, O::Error>> {
        self.submit(command)?;
        if !command.is_motion() {
            return Ok(StepOutcome::Done);
        }
        let period_ms = self.ctx.config.control_period().as_millis() as u32;
        for _ in 0..self.step_budget() {
            match self.tick() {
                None => return Ok(StepOutcome::Done),
                Some(StepOutcome::Continue) => delay.delay_ms(period_ms),
                Some(outcome) => return Ok(outcome),
            }
        }
        tracing::warn!("Step budget exhausted, stopping");
        self.active = None;
        self.ctx.all_stop();
        Ok(StepOutcome::TimedOut)
    }

    fn dispatch(
        &mut self,
        command: DriveCommand,
    ) {
        tracing::info!(?command, "Received drive command");
        if let Err(e) = self.submit(command) {
            tracing::error!(?e, "Drive command failed to start");
        }
    }

    /// Serve `DRIVE_CHANNEL` forever.
    ///
    /// While a motion runs, the channel is polled once per control period, so
    /// a new command takes over within one period.
    pub async fn run(&mut self) -> ! {
        loop {
            if self.is_idle() {
                let command = DRIVE_CHANNEL.receive().await;
                self.dispatch(command);
                self.tick();
                continue;
            }
            Timer::after(self.ctx.config.control_period()).await;
            if let Ok(command) = DRIVE_CHANNEL.try_receive() {
                self.dispatch(command);
            }
            self.tick();
        }
    }
}
