mod sim;

use core::cell::RefCell;
use std::path::PathBuf;

use cbp_core::utils::controllers::{DriveConfig, SystemClock};
use cbp_core::utils::{DriveCommand, DriveContext, DriveController, Instant, DRIVE_CHANNEL};
use clap::Parser;
use embassy_executor::{Executor, Spawner};
use embassy_time::{Duration, Timer};
use serde::Deserialize;
use sim::{SimImu, SimMotors, SimState};
use static_cell::StaticCell;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// JSON file with a list of `{ "at_ms": .., "command": {..} }` steps
    #[clap(long)]
    script: Option<PathBuf>,
    /// JSON file with a `DriveConfig` (missing fields take defaults)
    #[clap(long)]
    config: Option<PathBuf>,
    /// Simulated gyro drift (deg/s)
    #[clap(long, default_value_t = 0.0)]
    drift: f32,
    /// Fraction of speed the right wheel loses
    #[clap(long, default_value_t = 0.0)]
    right_bias: f32,
    /// Simulate a robot without the inertial sensor
    #[clap(long)]
    no_imu: bool,
    /// Time to keep running after the last script step (ms)
    #[clap(long, default_value_t = 3000)]
    linger_ms: u64,
}

/// One timed entry of a command script.
#[derive(Debug, Deserialize)]
struct ScriptStep {
    /// Offset from simulator start.
    at_ms: u64,
    command: DriveCommand,
}

type SimController = DriveController<SimMotors, SimImu, SystemClock>;

fn default_script() -> Vec<ScriptStep> {
    use cbp_core::utils::controllers::{Direction, TurnSide};
    use cbp_core::utils::math::kinematics::DistanceUnit;

    let steps = [
        (
            0,
            DriveCommand::Straight {
                speed: 30.0,
                direction: Direction::Forward,
                distance: Some(30.0),
                unit: DistanceUnit::Cm,
            },
        ),
        (
            4_000,
            DriveCommand::Turn {
                speed: 30.0,
                side: TurnSide::Right,
                angle: 90.0,
                gyro: true,
            },
        ),
        (
            5_500,
            DriveCommand::Turn {
                speed: 30.0,
                side: TurnSide::Left,
                angle: 90.0,
                gyro: false,
            },
        ),
        (
            8_500,
            DriveCommand::Distance {
                direction: Direction::Reverse,
                distance: 20.0,
                unit: DistanceUnit::Cm,
            },
        ),
    ];
    steps
        .into_iter()
        .map(|(at_ms, command)| ScriptStep { at_ms, command })
        .collect()
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

#[embassy_executor::task]
async fn drive_task(mut ctrl: SimController) -> ! {
    ctrl.run().await
}

#[embassy_executor::task]
async fn script_task(
    steps: Vec<ScriptStep>,
    linger: Duration,
    state: &'static RefCell<SimState>,
) {
    let start = Instant::now();
    for step in steps {
        Timer::at(start + Duration::from_millis(step.at_ms)).await;
        state.borrow_mut().report();
        info!(at_ms = step.at_ms, command = ?step.command, "Script step");
        DRIVE_CHANNEL.send(step.command).await;
    }
    Timer::after(linger).await;
    DRIVE_CHANNEL.send(DriveCommand::Stop).await;
    // let the drive task pick up the stop
    Timer::after(Duration::from_millis(50)).await;
    state.borrow_mut().report();
    info!("Script finished");
    std::process::exit(0);
}

#[embassy_executor::task]
async fn main_task(
    spawner: Spawner,
    opts: Opts,
) {
    let config: DriveConfig = match &opts.config {
        Some(path) => match load_json(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Invalid config: {}", e);
                std::process::exit(2);
            }
        },
        None => DriveConfig::default(),
    };
    let steps = match &opts.script {
        Some(path) => match load_json::<Vec<ScriptStep>>(path) {
            Ok(s) => s,
            Err(e) => {
                error!("Invalid script: {}", e);
                std::process::exit(2);
            }
        },
        None => default_script(),
    };
    info!(?config, steps = steps.len(), "Starting simulation");

    static SIM_STATE: StaticCell<RefCell<SimState>> = StaticCell::new();
    let state: &'static RefCell<SimState> = SIM_STATE.init(RefCell::new(SimState::new(
        config.geometry(),
        opts.right_bias,
        opts.drift,
        !opts.no_imu,
    )));

    let ctx = DriveContext::new(SimMotors::new(state), SimImu::new(state), config);
    let ctrl = DriveController::new(ctx, SystemClock);

    if let Err(e) = spawner.spawn(drive_task(ctrl)) {
        error!("Failed to spawn drive task: {:?}", e);
        return;
    }
    if let Err(e) = spawner.spawn(script_task(steps, Duration::from_millis(opts.linger_ms), state)) {
        error!("Failed to spawn script task: {:?}", e);
    }
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let opts = Opts::parse();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        if let Err(e) = spawner.spawn(main_task(spawner, opts)) {
            error!("Failed to spawn main task: {:?}", e);
        }
    });
}
