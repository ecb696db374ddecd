//! Scripted doubles for the drive interfaces.
//!
//! `Rig` holds the shared state: every actuator call is recorded, and sensor
//! reads pop from per-sensor queues (repeating the last value once a queue
//! runs dry). Time only moves when a test advances `TestClock` or sleeps
//! through `TestDelay`.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use cbp_core::utils::controllers::{
    runner::DriveController, Clock, Direction, DriveConfig, DriveContext, MotorActuator,
    OrientationSource, TurnSide, Wheel,
};
use cbp_core::utils::Instant;
use embedded_hal::delay::DelayNs;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetSpeeds(f32, f32),
    StopAll,
    ClearDistance(Wheel),
    Distance(Wheel),
    Speed(Wheel),
    RunDistance(Direction, u8),
    TurnBy(TurnSide, u16),
}

#[derive(Debug, Default)]
pub struct RigState {
    pub calls: Vec<Call>,
    pub distances: VecDeque<f32>,
    pub last_distance: f32,
    pub speeds: VecDeque<f32>,
    pub last_speed: f32,
    pub headings: VecDeque<f32>,
    pub last_heading: f32,
    pub imu_missing: bool,
    pub init_calls: u32,
    pub calibrations: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Rig(pub Rc<RefCell<RigState>>);

impl Rig {
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.borrow_mut().calls.clear();
    }

    pub fn push_headings(
        &self,
        headings: &[f32],
    ) {
        self.0.borrow_mut().headings.extend(headings.iter().copied());
    }

    pub fn push_distances(
        &self,
        distances: &[f32],
    ) {
        self.0.borrow_mut().distances.extend(distances.iter().copied());
    }

    pub fn push_speeds(
        &self,
        speeds: &[f32],
    ) {
        self.0.borrow_mut().speeds.extend(speeds.iter().copied());
    }

    pub fn set_imu_missing(
        &self,
        missing: bool,
    ) {
        self.0.borrow_mut().imu_missing = missing;
    }

    pub fn init_calls(&self) -> u32 {
        self.0.borrow().init_calls
    }

    pub fn calibrations(&self) -> u32 {
        self.0.borrow().calibrations
    }

    fn record(
        &self,
        call: Call,
    ) {
        self.0.borrow_mut().calls.push(call);
    }
}

fn pop_or_last(
    queue: &mut VecDeque<f32>,
    last: &mut f32,
) -> f32 {
    if let Some(v) = queue.pop_front() {
        *last = v;
    }
    *last
}

pub struct FakeMotors(pub Rig);

impl MotorActuator for FakeMotors {
    type Error = &'static str;

    fn set_speeds(
        &mut self,
        left: f32,
        right: f32,
    ) -> Result<(), Self::Error> {
        self.0.record(Call::SetSpeeds(left, right));
        Ok(())
    }

    fn stop_all(&mut self) -> Result<(), Self::Error> {
        self.0.record(Call::StopAll);
        Ok(())
    }

    fn clear_distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<(), Self::Error> {
        self.0.record(Call::ClearDistance(wheel));
        Ok(())
    }

    fn distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error> {
        self.0.record(Call::Distance(wheel));
        let mut state = self.0 .0.borrow_mut();
        let RigState {
            distances,
            last_distance,
            ..
        } = &mut *state;
        Ok(pop_or_last(distances, last_distance))
    }

    fn speed(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error> {
        self.0.record(Call::Speed(wheel));
        let mut state = self.0 .0.borrow_mut();
        let RigState {
            speeds, last_speed, ..
        } = &mut *state;
        Ok(pop_or_last(speeds, last_speed))
    }

    fn run_distance(
        &mut self,
        direction: Direction,
        cm: u8,
    ) -> Result<(), Self::Error> {
        self.0.record(Call::RunDistance(direction, cm));
        Ok(())
    }

    fn turn_by(
        &mut self,
        side: TurnSide,
        units: u16,
    ) -> Result<(), Self::Error> {
        self.0.record(Call::TurnBy(side, units));
        Ok(())
    }
}

pub struct FakeImu(pub Rig);

impl OrientationSource for FakeImu {
    type Error = &'static str;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        let mut state = self.0 .0.borrow_mut();
        state.init_calls += 1;
        if state.imu_missing {
            Err("no sensor")
        } else {
            Ok(())
        }
    }

    fn calibrate(
        &mut self,
        _seconds: u8,
    ) -> Result<(), Self::Error> {
        self.0 .0.borrow_mut().calibrations += 1;
        Ok(())
    }

    fn heading(&mut self) -> Result<f32, Self::Error> {
        let mut state = self.0 .0.borrow_mut();
        let RigState {
            headings,
            last_heading,
            ..
        } = &mut *state;
        Ok(pop_or_last(headings, last_heading))
    }
}

/// Manually advanced clock, in microseconds.
#[derive(Debug, Clone, Default)]
pub struct TestClock(pub Rc<Cell<u64>>);

impl TestClock {
    pub fn advance_ms(
        &self,
        ms: u64,
    ) {
        self.0.set(self.0.get() + ms * 1_000);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.0.get() / 1_000
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.0.get())
    }
}

/// Delay that advances a `TestClock` instead of sleeping.
pub struct TestDelay(pub TestClock);

impl DelayNs for TestDelay {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        let clock = &self.0 .0;
        clock.set(clock.get() + (ns as u64).div_ceil(1_000));
    }
}

pub type TestController = DriveController<FakeMotors, FakeImu, TestClock>;

/// A controller wired to a fresh rig and clock.
pub fn controller(config: DriveConfig) -> (Rig, TestClock, TestController) {
    let rig = Rig::default();
    let clock = TestClock::default();
    let ctx = DriveContext::new(FakeMotors(rig.clone()), FakeImu(rig.clone()), config);
    (rig, clock.clone(), DriveController::new(ctx, clock))
}
