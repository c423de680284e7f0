//! Closed-loop control engine for a profile-driven oven.
//!
//! A sparse time/temperature profile is interpolated into one setpoint per
//! sample interval, a PID controller turns the tracking error into heater duty
//! and a supervised loop converts that duty into on/off relay timing while
//! publishing one [`StatusRecord`] per tick.

pub use log;

pub mod duty;
pub mod error;
pub mod heater;
pub mod pid;
pub mod profile;
pub mod profile_reader;
pub mod reflow_controller;
pub mod report;
pub mod status;
pub mod temperature_sensor;
pub mod temperature_sensor_mock;

pub use error::Error;
pub use pid::{Accumulation, ControllerState, IntegrationMode, PidController, PidParams};
pub use profile::{AnchorPoint, Setpoint};
pub use reflow_controller::{ControlConfig, ControlRun, RunHandle};
pub use status::{RunState, StatusRecord, StatusStore};

pub static VERSION: &str = "v0.1";

/// Saturation threshold of the manipulated variable.
pub const MV_MAX: f32 = 1000.0;
/// Shortest heater pulse, in seconds, the relay can honour.
pub const MIN_PULSE_SECS: f32 = 0.01;
/// Horizon of the windowed integral, in samples.
pub const INTEGRAL_WINDOW: usize = 180;
/// Longest run, in setpoints, that a profile may interpolate to. Also bounds
/// the integral window.
pub const MAX_SETPOINTS: usize = 1 << 20;

pub const DEFAULT_PID_PARAMS: PidParams = PidParams {
    kp: 10.0,
    ki: 0.1,
    kd: 18.0,
    dt: 1.0,
};

/// Round to two decimals for reporting. Control math never uses this.
#[inline]
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
