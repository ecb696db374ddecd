//! Motion controllers for the Cutebot Pro.
//!
//! - `governor`: speed band clamping and steering trim
//! - `straight`: heading-hold straight-line drive
//! - `turn`: in-place turns, gyro-corrected or delegated to the motor board
//! - `distance`: open-loop distance run executed by the motor board
//! - `runner`: command sequencing and the control-loop drivers
//! - `i2c`: MPU6050 and Cutebot Pro drivers on a shared I2C bus
//!
//! Every controller is a step machine: `begin` validates and prepares a
//! command, then `step` is called once per control period and reports a
//! [`StepOutcome`]. Nothing here sleeps, so the loops can be driven by a
//! timer, an async task or a test with a scripted clock.

pub mod config;
pub mod distance;
pub mod governor;
pub mod i2c;
pub mod runner;
pub mod straight;
pub mod turn;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use serde::{Deserialize, Serialize};

pub use config::{DriveConfig, PidGains};
pub use governor::SpeedGovernor;

use crate::utils::math::kinematics::DistanceUnit;

/// Channel used to receive drive commands (`DriveCommand` messages).
pub static DRIVE_CHANNEL: embassy_sync::channel::Channel<CriticalSectionRawMutex, DriveCommand, 8> =
    embassy_sync::channel::Channel::new();

/// Direction of travel.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// `+1.0` forward, `-1.0` in reverse.
    pub fn modifier(self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }
}

/// Side of an in-place turn. Right is clockwise.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnSide {
    Left,
    Right,
}

impl TurnSide {
    pub fn opposite(self) -> Self {
        match self {
            TurnSide::Left => TurnSide::Right,
            TurnSide::Right => TurnSide::Left,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Wheel {
    Left,
    Right,
}

/// Wheel whose odometry is used for distance targets and settle detection.
pub const REFERENCE_WHEEL: Wheel = Wheel::Left;

/// Result of one control-loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep calling `step`.
    Continue,
    /// Target reached.
    Done,
    /// Cancelled by another command or by a device failure.
    Aborted,
    /// The safety timeout expired before the target was reached.
    TimedOut,
}

impl StepOutcome {
    pub fn is_finished(self) -> bool {
        !matches!(self, StepOutcome::Continue)
    }
}

/// Wheel motor driver with odometry.
///
/// Speeds are signed percentages, negative for reverse. Distances are
/// cumulative wheel rotation in degrees.
pub trait MotorActuator {
    type Error: core::fmt::Debug;

    fn set_speeds(
        &mut self,
        left: f32,
        right: f32,
    ) -> Result<(), Self::Error>;

    fn stop_all(&mut self) -> Result<(), Self::Error>;

    fn clear_distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<(), Self::Error>;

    fn distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error>;

    fn speed(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error>;

    /// Let the board run a fixed distance on its own.
    fn run_distance(
        &mut self,
        direction: Direction,
        cm: u8,
    ) -> Result<(), Self::Error>;

    /// Let the board turn in place on its own by `units` of its turn command.
    fn turn_by(
        &mut self,
        side: TurnSide,
        units: u16,
    ) -> Result<(), Self::Error>;
}

/// Inertial heading source.
pub trait OrientationSource {
    type Error: core::fmt::Debug;

    /// Detect and configure the sensor.
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Hold still for `seconds` and establish the zero reference.
    fn calibrate(
        &mut self,
        seconds: u8,
    ) -> Result<(), Self::Error>;

    /// Current heading in `[0, 360)`.
    fn heading(&mut self) -> Result<f32, Self::Error>;
}

/// Source of the current time for the control loops.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Clock backed by the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Errors that prevent a drive command from starting.
#[derive(Debug)]
pub enum DriveError<M: core::fmt::Debug, O: core::fmt::Debug> {
    Motor(M),
    Orientation(O),
    /// The orientation source could not be initialised; nothing was moved.
    OrientationUnavailable,
}

/// Drive command variants.
///
/// Serialized as JSON with tag `"dc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "dc", rename_all = "snake_case")]
pub enum DriveCommand {
    /// Heading-hold drive, for `distance` or until cancelled.
    Straight {
        speed: f32,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        distance: Option<f32>,
        #[serde(default)]
        unit: DistanceUnit,
    },
    /// In-place turn by `angle` degrees.
    Turn {
        speed: f32,
        side: TurnSide,
        angle: f32,
        #[serde(default = "gyro_default")]
        gyro: bool,
    },
    /// Open-loop distance run handled by the motor board.
    Distance {
        #[serde(default)]
        direction: Direction,
        distance: f32,
        #[serde(default)]
        unit: DistanceUnit,
    },
    /// Cancel whatever is running and stop the motors.
    Stop,

    // Configuration variants
    SteeringCorrection { percent: f32 },
    DistanceCorrection { percent: f32 },
    SpeedBounds { min: f32, max: f32 },
    Gains { kp: f32, ki: f32, kd: f32 },
}

fn gyro_default() -> bool {
    true
}

impl DriveCommand {
    /// Whether this command starts or stops motion (and so pre-empts the
    /// running loop).
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            DriveCommand::Straight { .. }
                | DriveCommand::Turn { .. }
                | DriveCommand::Distance { .. }
                | DriveCommand::Stop
        )
    }
}

/// Shared state of the drive subsystem: the devices, the configuration and
/// the process-wide flags.
///
/// The context is meant to be owned by a single task. All control loops run
/// cooperatively on that task, so the flags need no locking; handing the
/// context to more than one thread is not supported.
pub struct DriveContext<M, O> {
    pub motors: M,
    pub imu: O,
    pub config: DriveConfig,
    stop_drive: bool,
    imu_initialised: bool,
}

impl<M, O> DriveContext<M, O>
where
    M: MotorActuator,
    O: OrientationSource,
{
    pub fn new(
        motors: M,
        imu: O,
        config: DriveConfig,
    ) -> Self {
        Self {
            motors,
            imu,
            config,
            stop_drive: false,
            imu_initialised: false,
        }
    }

    /// Raise the cancellation flag. The running loop stops on its next step.
    pub fn request_stop(&mut self) {
        self.stop_drive = true;
    }

    pub(crate) fn clear_stop(&mut self) {
        self.stop_drive = false;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_drive
    }

    pub fn imu_initialised(&self) -> bool {
        self.imu_initialised
    }

    /// Initialise the orientation source on first use.
    ///
    /// Returns `false` if the sensor could not be brought up. A failure is not
    /// remembered; the next command tries again.
    pub fn ensure_orientation(&mut self) -> bool {
        if self.imu_initialised {
            return true;
        }
        match self.imu.initialize() {
            Ok(()) => {
                tracing::info!("Orientation source initialised");
                self.imu_initialised = true;
                true
            }
            Err(e) => {
                tracing::warn!(?e, "Orientation source not available");
                false
            }
        }
    }

    /// Command an all-stop and raise the cancellation flag.
    ///
    /// Bus errors are logged; the flag is raised regardless.
    pub fn all_stop(&mut self) {
        if let Err(e) = self.motors.stop_all() {
            tracing::error!(?e, "All-stop failed");
        }
        self.stop_drive = true;
    }

    pub fn governor(&self) -> SpeedGovernor {
        SpeedGovernor::from_config(&self.config)
    }

    pub fn set_steering_correction(
        &mut self,
        percent: f32,
    ) {
        self.config.steering_trim = percent;
    }

    pub fn set_distance_correction(
        &mut self,
        percent: f32,
    ) {
        self.config.distance_trim = percent;
    }

    pub fn set_speed_bounds(
        &mut self,
        min: f32,
        max: f32,
    ) {
        self.config.set_speed_bounds(min, max);
    }

    pub fn set_gains(
        &mut self,
        gains: PidGains,
    ) {
        self.config.gains = gains;
    }
}
