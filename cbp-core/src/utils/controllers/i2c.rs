//! I2C device management for the Cutebot Pro.
//!
//! The motor board and the MPU6050 inertial sensor share the micro:bit I2C
//! bus. Each driver holds a `RefCellDevice` onto the same `RefCell` bus and
//! implements one side of the drive interfaces: [`CutebotPro`] is the
//! [`MotorActuator`], [`Mpu6050`] the [`OrientationSource`].

use core::cell::RefCell;

use embassy_time::Instant;
use embedded_hal::{delay::DelayNs, i2c::I2c};
use embedded_hal_bus::i2c::RefCellDevice;

use super::{Clock, Direction, MotorActuator, OrientationSource, TurnSide, Wheel};
use crate::utils::math::heading::normalize;

/// I2C address of the Cutebot Pro motor board.
pub const CUTEBOT_ADDRESS: u8 = 0x10;
/// I2C address of the MPU6050 (AD0 low).
pub const MPU6050_ADDRESS: u8 = 0x68;

/// Errors that can occur when interacting with I2C-based devices.
#[derive(Debug)]
pub enum DeviceError<E: core::fmt::Debug> {
    I2c(E),
    /// WHO_AM_I returned something other than the MPU6050 identity.
    ImuNotDetected(u8),
    ImuNotInitialized,
}

/// MPU6050 register map (subset).
mod reg {
    pub const SMPLRT_DIV: u8 = 0x19;
    pub const CONFIG: u8 = 0x1A;
    pub const GYRO_CONFIG: u8 = 0x1B;
    pub const ACCEL_CONFIG: u8 = 0x1C;
    pub const INT_PIN_CFG: u8 = 0x37;
    pub const INT_ENABLE: u8 = 0x38;
    pub const GYRO_ZOUT_H: u8 = 0x47;
    pub const PWR_MGMT_1: u8 = 0x6B;
    pub const WHO_AM_I: u8 = 0x75;
}

/// Gyro sensitivity at ±2000 °/s full scale (LSB per °/s).
const GYRO_LSB_PER_DPS: f32 = 16.4;

/// Interval between bias samples during calibration (ms).
const CALIBRATION_SAMPLE_MS: u32 = 10;

/// MPU6050 heading source.
///
/// The heading is the integral of the Z gyro rate minus the bias measured
/// during [`OrientationSource::calibrate`], clockwise positive. It is
/// integrated on every `heading()` call, so callers should poll regularly.
pub struct Mpu6050<'a, I2C: 'static, C, D> {
    dev: RefCellDevice<'a, I2C>,
    clock: C,
    delay: D,
    initialised: bool,
    bias_dps: f32,
    heading: f32,
    last_sample: Option<Instant>,
}

impl<'a, I2C, E, C, D> Mpu6050<'a, I2C, C, D>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
    C: Clock,
    D: DelayNs,
{
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        clock: C,
        delay: D,
    ) -> Self {
        Self {
            dev: RefCellDevice::new(i2c_bus),
            clock,
            delay,
            initialised: false,
            bias_dps: 0.0,
            heading: 0.0,
            last_sample: None,
        }
    }

    fn read_byte(
        &mut self,
        register: u8,
    ) -> Result<u8, DeviceError<E>> {
        let mut buf = [0u8; 1];
        self.dev
            .write_read(MPU6050_ADDRESS, &[register], &mut buf)
            .map_err(DeviceError::I2c)?;
        Ok(buf[0])
    }

    fn write_byte(
        &mut self,
        register: u8,
        value: u8,
    ) -> Result<(), DeviceError<E>> {
        self.dev
            .write(MPU6050_ADDRESS, &[register, value])
            .map_err(DeviceError::I2c)
    }

    /// Raw Z gyro rate in °/s, bias not removed.
    pub fn read_gyro_z(&mut self) -> Result<f32, DeviceError<E>> {
        let mut buf = [0u8; 2];
        self.dev
            .write_read(MPU6050_ADDRESS, &[reg::GYRO_ZOUT_H], &mut buf)
            .map_err(DeviceError::I2c)?;
        Ok(i16::from_be_bytes(buf) as f32 / GYRO_LSB_PER_DPS)
    }

    pub fn bias(&self) -> f32 {
        self.bias_dps
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }
}

impl<'a, I2C, E, C, D> OrientationSource for Mpu6050<'a, I2C, C, D>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
    C: Clock,
    D: DelayNs,
{
    type Error = DeviceError<E>;

    /// Check the identity register and configure the sensor.
    ///
    /// Gyro ±2000 °/s, accel ±16 g, 42 Hz low-pass, 250 Hz sample rate,
    /// data-ready interrupt enabled.
    fn initialize(&mut self) -> Result<(), Self::Error> {
        let id = self.read_byte(reg::WHO_AM_I)?;
        if id != MPU6050_ADDRESS {
            return Err(DeviceError::ImuNotDetected(id));
        }

        // reset, wake, then switch to the gyro PLL clock
        self.write_byte(reg::PWR_MGMT_1, 0x80)?;
        self.delay.delay_ms(100);
        self.write_byte(reg::PWR_MGMT_1, 0x00)?;
        self.delay.delay_ms(100);
        self.write_byte(reg::PWR_MGMT_1, 0x03)?;
        self.delay.delay_ms(200);

        self.write_byte(reg::CONFIG, 0x03)?;
        self.write_byte(reg::SMPLRT_DIV, 0x03)?;

        let gyro = self.read_byte(reg::GYRO_CONFIG)?;
        self.write_byte(reg::GYRO_CONFIG, (gyro & !0x03 & !0x18) | (3 << 3))?;
        let accel = self.read_byte(reg::ACCEL_CONFIG)?;
        self.write_byte(reg::ACCEL_CONFIG, (accel & !0x18) | (3 << 3))?;

        self.write_byte(reg::INT_PIN_CFG, 0x22)?;
        self.write_byte(reg::INT_ENABLE, 0x01)?;
        self.delay.delay_ms(100);

        self.initialised = true;
        tracing::info!("MPU6050 configured");
        Ok(())
    }

    /// Average the Z rate over `seconds` of standstill and zero the heading.
    fn calibrate(
        &mut self,
        seconds: u8,
    ) -> Result<(), Self::Error> {
        if !self.initialised {
            return Err(DeviceError::ImuNotInitialized);
        }
        let samples = (seconds as u32 * 1000 / CALIBRATION_SAMPLE_MS).max(1);
        let mut sum = 0.0f32;
        for _ in 0..samples {
            sum += self.read_gyro_z()?;
            self.delay.delay_ms(CALIBRATION_SAMPLE_MS);
        }
        self.bias_dps = sum / samples as f32;
        self.heading = 0.0;
        self.last_sample = Some(self.clock.now());
        tracing::info!(bias = self.bias_dps, samples, "Gyro calibrated");
        Ok(())
    }

    fn heading(&mut self) -> Result<f32, Self::Error> {
        if !self.initialised {
            return Err(DeviceError::ImuNotInitialized);
        }
        let rate = self.read_gyro_z()? - self.bias_dps;
        let now = self.clock.now();
        if let Some(last) = self.last_sample {
            let dt = now.saturating_duration_since(last).as_micros() as f32 / 1_000_000.0;
            // sensor Z points up, so a positive rate is counter-clockwise
            self.heading = normalize(self.heading - rate * dt);
        }
        self.last_sample = Some(now);
        Ok(self.heading)
    }
}

/// Cutebot Pro motor board command codes.
///
/// Frames are `0x99 <cmd> p0 p1 p2 p3 0x88`.
pub mod cmd {
    pub const FRAME_HEAD: u8 = 0x99;
    pub const FRAME_TAIL: u8 = 0x88;

    pub const SET_SPEEDS: u8 = 0x01;
    pub const RUN_DISTANCE: u8 = 0x03;
    pub const TURN_ANGLE: u8 = 0x04;
    pub const STOP: u8 = 0x09;
    pub const CLEAR_DISTANCE: u8 = 0x0A;
    pub const READ_DISTANCE: u8 = 0x0B;
    pub const READ_SPEED: u8 = 0x0C;
}

/// Build a 7-byte motor board frame.
pub fn frame(
    command: u8,
    params: [u8; 4],
) -> [u8; 7] {
    [
        cmd::FRAME_HEAD,
        command,
        params[0],
        params[1],
        params[2],
        params[3],
        cmd::FRAME_TAIL,
    ]
}

fn wheel_code(wheel: Wheel) -> u8 {
    match wheel {
        Wheel::Left => 0x01,
        Wheel::Right => 0x02,
    }
}

/// Percentage magnitude as sent on the bus.
fn speed_byte(speed: f32) -> u8 {
    libm::roundf(libm::fabsf(speed)).clamp(0.0, 100.0) as u8
}

/// Driver for the Cutebot Pro motor board.
pub struct CutebotPro<'a, I2C: 'static> {
    dev: RefCellDevice<'a, I2C>,
}

impl<'a, I2C, E> CutebotPro<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    pub fn new(i2c_bus: &'a RefCell<I2C>) -> Self {
        Self {
            dev: RefCellDevice::new(i2c_bus),
        }
    }

    fn send(
        &mut self,
        command: u8,
        params: [u8; 4],
    ) -> Result<(), DeviceError<E>> {
        self.dev
            .write(CUTEBOT_ADDRESS, &frame(command, params))
            .map_err(DeviceError::I2c)
    }

    fn query<const N: usize>(
        &mut self,
        command: u8,
        wheel: Wheel,
    ) -> Result<[u8; N], DeviceError<E>> {
        self.send(command, [wheel_code(wheel), 0, 0, 0])?;
        let mut buf = [0u8; N];
        self.dev
            .read(CUTEBOT_ADDRESS, &mut buf)
            .map_err(DeviceError::I2c)?;
        Ok(buf)
    }
}

impl<'a, I2C, E> MotorActuator for CutebotPro<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    type Error = DeviceError<E>;

    fn set_speeds(
        &mut self,
        left: f32,
        right: f32,
    ) -> Result<(), Self::Error> {
        let mut reverse = 0u8;
        if left < 0.0 {
            reverse |= 0x01;
        }
        if right < 0.0 {
            reverse |= 0x02;
        }
        self.send(cmd::SET_SPEEDS, [speed_byte(left), speed_byte(right), reverse, 0])
    }

    fn stop_all(&mut self) -> Result<(), Self::Error> {
        self.send(cmd::STOP, [0; 4])
    }

    fn clear_distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<(), Self::Error> {
        self.send(cmd::CLEAR_DISTANCE, [wheel_code(wheel), 0, 0, 0])
    }

    fn distance(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error> {
        let raw: [u8; 4] = self.query(cmd::READ_DISTANCE, wheel)?;
        Ok(i32::from_be_bytes(raw) as f32)
    }

    fn speed(
        &mut self,
        wheel: Wheel,
    ) -> Result<f32, Self::Error> {
        let raw: [u8; 2] = self.query(cmd::READ_SPEED, wheel)?;
        Ok(i16::from_be_bytes(raw) as f32)
    }

    fn run_distance(
        &mut self,
        direction: Direction,
        cm: u8,
    ) -> Result<(), Self::Error> {
        let orientation = match direction {
            Direction::Forward => 1,
            Direction::Reverse => 0,
        };
        self.send(cmd::RUN_DISTANCE, [orientation, cm, 0, 0])
    }

    fn turn_by(
        &mut self,
        side: TurnSide,
        units: u16,
    ) -> Result<(), Self::Error> {
        let side = match side {
            TurnSide::Left => 0,
            TurnSide::Right => 1,
        };
        let [hi, lo] = units.to_be_bytes();
        self.send(cmd::TURN_ANGLE, [side, hi, lo, 0])
    }
}
