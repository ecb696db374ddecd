//! Simulated Cutebot Pro chassis.
//!
//! `SimState` integrates the wheel rates commanded through [`SimMotors`] into
//! odometry, heading and position. [`SimImu`] reads the same state, so the
//! heading-hold loop sees the consequences of its own commands. Wheel
//! asymmetry and gyro drift can be injected to exercise the correction path.

use core::cell::RefCell;
use core::convert::Infallible;

use cbp_core::utils::controllers::{
    config::{BUS_TURN_OFFSET, BUS_TURN_UNITS_PER_DEGREE},
    Direction, MotorActuator, OrientationSource, TurnSide, Wheel,
};
use cbp_core::utils::math::heading::normalize;
use cbp_core::utils::{dg, Duration, Instant};
use tracing::{debug, info};

/// Wheel rate at 100 % speed (deg/s).
const FULL_SPEED_DPS: f32 = 720.0;
/// Ground speed of the board's own distance run (cm/s).
const BOARD_RUN_CM_PER_S: f32 = 20.0;
/// Wheel speed (percent) the board uses for its own turns.
const BOARD_TURN_PERCENT: f32 = 30.0;

/// Wheel motion executed by the board without host involvement.
#[derive(Debug, Clone, Copy)]
struct BoardMotion {
    left_dps: f32,
    right_dps: f32,
    until: Instant,
}

#[derive(Debug)]
pub struct SimState {
    geometry: dg,
    /// Fraction by which the right wheel under-delivers.
    right_bias: f32,
    /// Gyro drift added to the true heading rate (deg/s).
    drift_dps: f32,
    imu_present: bool,

    left_dps: f32,
    right_dps: f32,
    board: Option<BoardMotion>,
    left_distance: f32,
    right_distance: f32,
    /// True heading, clockwise from the start pose.
    heading: f32,
    /// Heading as the gyro integrates it, drift included.
    gyro_heading: f32,
    gyro_zero: f32,
    x: f32,
    y: f32,
    last_update: Instant,
}

impl SimState {
    pub fn new(
        geometry: dg,
        right_bias: f32,
        drift_dps: f32,
        imu_present: bool,
    ) -> Self {
        Self {
            geometry,
            right_bias,
            drift_dps,
            imu_present,
            left_dps: 0.0,
            right_dps: 0.0,
            board: None,
            left_distance: 0.0,
            right_distance: 0.0,
            heading: 0.0,
            gyro_heading: 0.0,
            gyro_zero: 0.0,
            x: 0.0,
            y: 0.0,
            last_update: Instant::now(),
        }
    }

    /// Integrate motion up to `now`.
    fn advance(
        &mut self,
        now: Instant,
    ) {
        if let Some(board) = self.board {
            if now >= board.until {
                self.integrate(board.left_dps, board.right_dps, board.until);
                self.board = None;
                debug!("Board motion finished");
            } else {
                self.integrate(board.left_dps, board.right_dps, now);
                return;
            }
        }
        self.integrate(self.left_dps, self.right_dps, now);
    }

    fn integrate(
        &mut self,
        left_dps: f32,
        right_dps: f32,
        until: Instant,
    ) {
        let dt = until.saturating_duration_since(self.last_update).as_micros() as f32 / 1_000_000.0;
        self.last_update = self.last_update.max(until);
        if dt <= 0.0 {
            return;
        }

        let right_dps = right_dps * (1.0 - self.right_bias);
        let (v, yaw) = self.geometry.body_rates(left_dps, right_dps);
        self.left_distance += left_dps * dt;
        self.right_distance += right_dps * dt;

        let mid = (self.heading + yaw * dt / 2.0).to_radians();
        self.x += v * dt * mid.sin();
        self.y += v * dt * mid.cos();
        self.heading = normalize(self.heading + yaw * dt);
        self.gyro_heading = normalize(self.gyro_heading + (yaw + self.drift_dps) * dt);
    }

    fn wheel_rate(
        &self,
        wheel: Wheel,
    ) -> f32 {
        let (left, right) = match self.board {
            Some(board) => (board.left_dps, board.right_dps),
            None => (self.left_dps, self.right_dps),
        };
        match wheel {
            Wheel::Left => left,
            Wheel::Right => right * (1.0 - self.right_bias),
        }
    }

    /// Log where the robot ended up.
    pub fn report(&mut self) {
        self.advance(Instant::now());
        info!(
            x_cm = self.x,
            y_cm = self.y,
            heading = self.heading,
            left_deg = self.left_distance,
            right_deg = self.right_distance,
            "Simulated pose"
        );
    }
}

fn percent_to_dps(percent: f32) -> f32 {
    percent.clamp(-100.0, 100.0) / 100.0 * FULL_SPEED_DPS
}

/// Simulated motor board.
pub struct SimMotors {
    state: &'static RefCell<SimState>,
}

impl SimMotors {
    pub fn new(state: &'static RefCell<SimState>) -> Self {
        Self { state }
    }
}

impl MotorActuator for SimMotors {
    type Error = Infallible;

    fn set_speeds(
        &mut self,
        left: f32,
        right: f32,
    ) -> Result<(), Self::Error> {
        let mut s = self.state.borrow_mut();
        s.advance(Instant::now());
        s.board = None;
        s.left_dps = percent_to_dps(left);
        s.right_dps = percent_to_dps(right);
        Ok(())
    }

    fn stop_all(&mut self) -> Result<(), Self::Error> {
        self.set_speeds(0.0, 0.0)
    }

    fn clear_distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<(), Self::Error> {
        let mut s = self.state.borrow_mut();
        s.advance(Instant::now());
        match wheel {
            Wheel::Left => s.left_distance = 0.0,
            Wheel::Right => s.right_distance = 0.0,
        }
        Ok(())
    }

    fn distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error> {
        let mut s = self.state.borrow_mut();
        s.advance(Instant::now());
        Ok(match wheel {
            Wheel::Left => s.left_distance,
            Wheel::Right => s.right_distance,
        })
    }

    fn speed(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error> {
        let mut s = self.state.borrow_mut();
        s.advance(Instant::now());
        Ok(s.wheel_rate(wheel) / FULL_SPEED_DPS * 100.0)
    }

    fn run_distance(
        &mut self,
        direction: Direction,
        cm: u8,
    ) -> Result<(), Self::Error> {
        let mut s = self.state.borrow_mut();
        let now = Instant::now();
        s.advance(now);
        let dps = BOARD_RUN_CM_PER_S * s.geometry.degrees_per_cm() * direction.modifier();
        let secs = cm as f32 / BOARD_RUN_CM_PER_S;
        s.left_dps = 0.0;
        s.right_dps = 0.0;
        s.board = Some(BoardMotion {
            left_dps: dps,
            right_dps: dps,
            until: now + Duration::from_micros((secs * 1_000_000.0) as u64),
        });
        Ok(())
    }

    fn turn_by(
        &mut self,
        side: TurnSide,
        units: u16,
    ) -> Result<(), Self::Error> {
        let mut s = self.state.borrow_mut();
        let now = Instant::now();
        s.advance(now);
        let angle = ((units as f32 - BUS_TURN_OFFSET) / BUS_TURN_UNITS_PER_DEGREE).max(0.0);
        let dps = percent_to_dps(BOARD_TURN_PERCENT);
        let (left, right) = match side {
            TurnSide::Right => (dps, -dps),
            TurnSide::Left => (-dps, dps),
        };
        let (_, yaw) = s.geometry.body_rates(dps, -dps);
        let secs = angle / yaw;
        s.left_dps = 0.0;
        s.right_dps = 0.0;
        s.board = Some(BoardMotion {
            left_dps: left,
            right_dps: right,
            until: now + Duration::from_micros((secs * 1_000_000.0) as u64),
        });
        Ok(())
    }
}

#[derive(Debug)]
pub enum SimImuError {
    NotPresent,
}

/// Simulated gyro heading source.
pub struct SimImu {
    state: &'static RefCell<SimState>,
}

impl SimImu {
    pub fn new(state: &'static RefCell<SimState>) -> Self {
        Self { state }
    }
}

impl OrientationSource for SimImu {
    type Error = SimImuError;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        if self.state.borrow().imu_present {
            Ok(())
        } else {
            Err(SimImuError::NotPresent)
        }
    }

    /// Zero the heading. The simulated gyro has no bias to measure.
    fn calibrate(
        &mut self,
        _seconds: u8,
    ) -> Result<(), Self::Error> {
        let mut s = self.state.borrow_mut();
        s.advance(Instant::now());
        s.gyro_zero = s.gyro_heading;
        Ok(())
    }

    fn heading(&mut self) -> Result<f32, Self::Error> {
        let mut s = self.state.borrow_mut();
        s.advance(Instant::now());
        Ok(normalize(s.gyro_heading - s.gyro_zero))
    }
}
