use core::cell::RefCell;

use cbp_core::utils::controllers::{
    i2c::{CutebotPro, DeviceError, Mpu6050, CUTEBOT_ADDRESS, MPU6050_ADDRESS},
    runner::DriveController,
    Direction, DriveCommand, DriveConfig, DriveContext, MotorActuator, OrientationSource,
    TurnSide, Wheel,
};
use embedded_hal::i2c::ErrorKind;
use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};

mod mock_devices;
use mock_devices::TestClock;

/// Create a write transaction for the given I2C address and data payload.
pub fn write(
    addr: u8,
    data: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write(addr, data)
}
/// Create a write_read transaction for the given I2C address/payloads.
pub fn write_read(
    addr: u8,
    write: Vec<u8>,
    read: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write_read(addr, write, read)
}
/// Create a read transaction for the given I2C address and expected data.
pub fn read(
    addr: u8,
    data: Vec<u8>,
) -> I2cTrans {
    I2cTrans::read(addr, data)
}

/// A motor board frame written to the Cutebot Pro.
fn board(
    command: u8,
    params: [u8; 4],
) -> I2cTrans {
    write(
        CUTEBOT_ADDRESS,
        vec![0x99, command, params[0], params[1], params[2], params[3], 0x88],
    )
}

/// MPU6050 bring-up as issued by `initialize`.
fn imu_init_sequence() -> Vec<I2cTrans> {
    vec![
        write_read(MPU6050_ADDRESS, vec![0x75], vec![0x68]),
        write(MPU6050_ADDRESS, vec![0x6B, 0x80]),
        write(MPU6050_ADDRESS, vec![0x6B, 0x00]),
        write(MPU6050_ADDRESS, vec![0x6B, 0x03]),
        write(MPU6050_ADDRESS, vec![0x1A, 0x03]),
        write(MPU6050_ADDRESS, vec![0x19, 0x03]),
        write_read(MPU6050_ADDRESS, vec![0x1B], vec![0x03]),
        write(MPU6050_ADDRESS, vec![0x1B, 0x18]),
        write_read(MPU6050_ADDRESS, vec![0x1C], vec![0x07]),
        write(MPU6050_ADDRESS, vec![0x1C, 0x1F]),
        write(MPU6050_ADDRESS, vec![0x37, 0x22]),
        write(MPU6050_ADDRESS, vec![0x38, 0x01]),
    ]
}

fn gyro_z(raw: i16) -> I2cTrans {
    write_read(MPU6050_ADDRESS, vec![0x47], raw.to_be_bytes().to_vec())
}

#[test]
fn test_imu_initialization() {
    let mock = I2cMock::new(&imu_init_sequence());
    let i2c_bus = RefCell::new(mock);
    let mut imu = Mpu6050::new(&i2c_bus, TestClock::default(), NoopDelay::new());

    imu.initialize().unwrap();
    assert!(imu.is_initialised());
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_imu_wrong_identity() {
    let expectations = [write_read(MPU6050_ADDRESS, vec![0x75], vec![0x70])];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut imu = Mpu6050::new(&i2c_bus, TestClock::default(), NoopDelay::new());

    assert!(matches!(imu.initialize(), Err(DeviceError::ImuNotDetected(0x70))));
    assert!(!imu.is_initialised());
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_imu_requires_initialization() {
    let expectations: [I2cTrans; 0] = [];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut imu = Mpu6050::new(&i2c_bus, TestClock::default(), NoopDelay::new());

    assert!(matches!(imu.calibrate(1), Err(DeviceError::ImuNotInitialized)));
    assert!(matches!(imu.heading(), Err(DeviceError::ImuNotInitialized)));
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_imu_calibrate_and_integrate() {
    let mut expectations = imu_init_sequence();
    // 1 s of standstill sampled every 10 ms, with a constant bias of 2 LSB
    expectations.extend((0..100).map(|_| gyro_z(2)));
    // then 10 °/s counter-clockwise on top of the bias
    expectations.push(gyro_z(164 + 2));

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let clock = TestClock::default();
    let mut imu = Mpu6050::new(&i2c_bus, clock.clone(), NoopDelay::new());

    imu.initialize().unwrap();
    imu.calibrate(1).unwrap();
    assert!((imu.bias() - 2.0 / 16.4).abs() < 1e-4);

    clock.advance_ms(500);
    let heading = imu.heading().unwrap();
    assert!((heading - 355.0).abs() < 0.01, "heading {}", heading);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_set_speeds_frame() {
    let expectations = [
        board(0x01, [30, 42, 0x02, 0]),
        board(0x01, [100, 0, 0x01, 0]),
    ];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut motors = CutebotPro::new(&i2c_bus);

    motors.set_speeds(30.0, -42.4).unwrap();
    motors.set_speeds(-140.0, 0.0).unwrap();
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_odometry_reads() {
    let expectations = [
        board(0x0A, [0x01, 0, 0, 0]),
        board(0x0B, [0x01, 0, 0, 0]),
        read(CUTEBOT_ADDRESS, vec![0x00, 0x00, 0x08, 0xDD]),
        board(0x0B, [0x02, 0, 0, 0]),
        read(CUTEBOT_ADDRESS, vec![0xFF, 0xFF, 0xFF, 0x9C]),
        board(0x0C, [0x01, 0, 0, 0]),
        read(CUTEBOT_ADDRESS, vec![0x00, 0x19]),
    ];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut motors = CutebotPro::new(&i2c_bus);

    motors.clear_distance(Wheel::Left).unwrap();
    assert_eq!(motors.distance(Wheel::Left).unwrap(), 2269.0);
    assert_eq!(motors.distance(Wheel::Right).unwrap(), -100.0);
    assert_eq!(motors.speed(Wheel::Left).unwrap(), 25.0);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_board_run_and_turn_frames() {
    let expectations = [
        board(0x03, [0x01, 48, 0, 0]),
        board(0x03, [0x00, 9, 0, 0]),
        board(0x04, [0x01, 0x01, 0x49, 0]),
        board(0x04, [0x00, 0x02, 0x8E, 0]),
        board(0x09, [0, 0, 0, 0]),
    ];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut motors = CutebotPro::new(&i2c_bus);

    motors.run_distance(Direction::Forward, 48).unwrap();
    motors.run_distance(Direction::Reverse, 9).unwrap();
    motors.turn_by(TurnSide::Right, 329).unwrap();
    motors.turn_by(TurnSide::Left, 654).unwrap();
    motors.stop_all().unwrap();
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_bus_error_is_reported() {
    let expectations = [board(0x09, [0, 0, 0, 0]).with_error(ErrorKind::Other)];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut motors = CutebotPro::new(&i2c_bus);

    assert!(matches!(motors.stop_all(), Err(DeviceError::I2c(ErrorKind::Other))));
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_shared_bus_drivers() {
    let mut expectations = imu_init_sequence();
    expectations.push(board(0x01, [20, 20, 0, 0]));
    expectations.push(gyro_z(0));

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut imu = Mpu6050::new(&i2c_bus, TestClock::default(), NoopDelay::new());
    let mut motors = CutebotPro::new(&i2c_bus);

    imu.initialize().unwrap();
    motors.set_speeds(20.0, 20.0).unwrap();
    imu.read_gyro_z().unwrap();
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_controller_on_bus_drivers() {
    // A bus turn never touches the sensor; the stop command stops twice
    // (once to end the turn, once for the command itself).
    let expectations = [
        board(0x04, [0x01, 0x01, 0x49, 0]),
        board(0x09, [0, 0, 0, 0]),
        board(0x09, [0, 0, 0, 0]),
    ];
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let clock = TestClock::default();
    let ctx = DriveContext::new(
        CutebotPro::new(&i2c_bus),
        Mpu6050::new(&i2c_bus, clock.clone(), NoopDelay::new()),
        DriveConfig::default(),
    );
    let mut ctrl = DriveController::new(ctx, clock);

    ctrl.submit(DriveCommand::Turn {
        speed: 30.0,
        side: TurnSide::Right,
        angle: 90.0,
        gyro: false,
    })
    .unwrap();
    ctrl.submit(DriveCommand::Stop).unwrap();

    assert!(ctrl.is_idle());
    assert!(!ctrl.context().imu_initialised());
    i2c_bus.borrow_mut().done();
}
