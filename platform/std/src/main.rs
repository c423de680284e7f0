use std::path::PathBuf;

use clap::Parser;
use embassy_executor::{SpawnError, SpawnToken, Spawner};
use embassy_futures::select::{select, Either};
use embassy_time::{Delay, Duration, Timer};
use log::*;
use rand_core::{OsRng, TryRngCore};
use static_cell::StaticCell;

use profile_oven::profile_reader::{self, BUILTIN_PROFILES};
use profile_oven::report;
use profile_oven::temperature_sensor::{SensorError, TemperatureSensor};
use profile_oven::temperature_sensor_mock::{OvenModel, OvenThermocouple, ThermalParams};
use profile_oven::{
    Accumulation, AnchorPoint, ControlConfig, ControlRun, IntegrationMode, PidParams, RunHandle,
    RunState, StatusStore,
};

static STATUS: StatusStore = StatusStore::new();
static OVEN: StaticCell<OvenModel> = StaticCell::new();

const REPORT_PERIOD: Duration = Duration::from_millis(500);

/// Run a reflow profile against the simulated oven.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// JSON recipe file; takes precedence over --profile
    #[clap(short, long, value_parser)]
    recipe: Option<PathBuf>,

    /// Built-in profile: lead_free, leaded or low_temp
    #[clap(short, long, default_value = "lead_free", value_parser)]
    profile: String,

    #[clap(long, value_parser)]
    kp: Option<f32>,
    #[clap(long, value_parser)]
    ki: Option<f32>,
    #[clap(long, value_parser)]
    kd: Option<f32>,
    /// Sample interval in seconds
    #[clap(long, value_parser)]
    dt: Option<f32>,

    /// Use the velocity form of the controller
    #[clap(long)]
    incremental: bool,

    /// Only integrate over the last N samples (180 when N is omitted)
    #[clap(long, value_parser)]
    integral_window: Option<Option<usize>>,

    /// Cancel the run after this many seconds
    #[clap(long, value_parser)]
    cancel_after: Option<u64>,

    /// Peak thermocouple noise in degrees
    #[clap(long, default_value_t = 0.25, value_parser)]
    noise: f32,

    #[clap(long, default_value_t = 25.0, value_parser)]
    ambient: f32,

    #[clap(long, default_value = "info", value_parser)]
    log_level: LevelFilter,
}

/// Simulated thermocouple with a little read noise on top.
struct NoisyThermocouple {
    inner: OvenThermocouple<'static>,
    amplitude: f32,
}

impl TemperatureSensor for NoisyThermocouple {
    async fn read_temperature(&mut self) -> Result<f32, SensorError> {
        let temp = self.inner.read_temperature().await?;
        let unit = OsRng
            .try_next_u32()
            .map(|v| v as f32 / u32::MAX as f32)
            .unwrap_or(0.5);
        Ok(temp + (unit * 2.0 - 1.0) * self.amplitude)
    }
}

#[embassy_executor::task]
async fn control_task(run: ControlRun<'static>, oven: &'static OvenModel, noise: f32) {
    let sensor = NoisyThermocouple {
        inner: oven.thermocouple(),
        amplitude: noise,
    };
    let state = run.execute(sensor, oven.relay(), Delay).await;
    info!("Control loop exited: {}", state);
}

#[embassy_executor::task]
async fn report_task(store: &'static StatusStore) {
    let Some(mut changes) = store.subscribe() else {
        error!("No observer slot left for the reporter");
        return;
    };

    let mut seen = 0;
    loop {
        let state = match select(changes.changed(), Timer::after(REPORT_PERIOD)).await {
            Either::First(state) => state,
            Either::Second(()) => store.state(),
        };

        for record in store.records_since(seen) {
            seen += 1;
            match report::record_line(&record) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Could not render record {}: {:?}", seen, e),
            }
        }

        if state.is_terminal() {
            if let Ok(line) = report::state_line(&state, seen) {
                println!("{}", line);
            }
            let code = if matches!(state, RunState::Error(_)) { 1 } else { 0 };
            std::process::exit(code);
        }
    }
}

#[embassy_executor::task]
async fn cancel_task(handle: RunHandle<'static>, after: Duration) {
    Timer::after(after).await;
    if handle.request_cancel() {
        warn!("Cancelling run after {}s", after.as_secs());
    }
}

fn load_recipe(args: &Args) -> Result<(Vec<AnchorPoint>, PidParams), Box<dyn std::error::Error>> {
    let (anchors, base) = match &args.recipe {
        Some(path) => {
            info!("Loading recipe from {}", path.display());
            let text = std::fs::read_to_string(path)?;
            let recipe = profile_reader::parse_recipe(&text)?;
            (recipe.profile.to_vec(), recipe.params())
        }
        None => {
            let anchors = profile_reader::builtin_profile(&args.profile).ok_or(
                profile_oven::Error::Recipe("unknown built-in profile"),
            )?;
            (anchors.to_vec(), PidParams::default())
        }
    };

    let params = PidParams {
        kp: args.kp.unwrap_or(base.kp),
        ki: args.ki.unwrap_or(base.ki),
        kd: args.kd.unwrap_or(base.kd),
        dt: args.dt.unwrap_or(base.dt),
    };
    Ok((anchors, params))
}

fn spawn_or_exit<S>(spawner: &Spawner, token: Result<SpawnToken<S>, SpawnError>, name: &str) {
    match token {
        Ok(token) => spawner.spawn(token),
        Err(e) => {
            error!("Failed to spawn {}: {:?}", name, e);
            std::process::exit(1);
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(args.log_level)
        .format_timestamp_nanos()
        .init();

    info!("profile-oven {}", profile_oven::VERSION);

    let (anchors, params) = match load_recipe(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{} (built-in profiles: {:?})", e, BUILTIN_PROFILES);
            std::process::exit(2);
        }
    };

    let config = ControlConfig {
        mode: if args.incremental {
            IntegrationMode::Incremental
        } else {
            IntegrationMode::Trapezoidal
        },
        accumulation: match args.integral_window {
            None => Accumulation::Unbounded,
            Some(None) => Accumulation::default_window(),
            Some(Some(n)) => Accumulation::Windowed(n),
        },
        ..ControlConfig::default()
    };

    let oven: &'static OvenModel = OVEN.init(OvenModel::new(ThermalParams {
        ambient_temp: args.ambient,
        ..ThermalParams::toaster()
    }));

    let run = match STATUS.start_run(&anchors, params, config) {
        Ok(run) => run,
        Err(e) => {
            error!("Run rejected: {}", e);
            std::process::exit(2);
        }
    };
    let handle = run.handle();

    spawn_or_exit(&spawner, report_task(&STATUS), "report_task");
    spawn_or_exit(&spawner, control_task(run, oven, args.noise), "control_task");
    if let Some(secs) = args.cancel_after {
        spawn_or_exit(
            &spawner,
            cancel_task(handle, Duration::from_secs(secs)),
            "cancel_task",
        );
    }
}
