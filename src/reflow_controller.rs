use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;

use crate::duty::{self, DutySchedule};
use crate::heater::{Heater, HeaterGuard};
use crate::log::*;
use crate::pid::{Accumulation, IntegrationMode, PidController, PidParams};
use crate::profile::{self, AnchorPoint, ProfileError, Setpoint};
use crate::status::{Recipe, RunState, StatusRecord, StatusStore};
use crate::temperature_sensor::{SensorError, TemperatureSensor};
use crate::{Error, MAX_SETPOINTS, MIN_PULSE_SECS, MV_MAX};

/// Knobs that stay fixed for a run besides the PID gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlConfig {
    pub mv_max: f32,
    /// Shortest heater pulse in seconds.
    pub min_pulse_secs: f32,
    pub mode: IntegrationMode,
    pub accumulation: Accumulation,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mv_max: MV_MAX,
            min_pulse_secs: MIN_PULSE_SECS,
            mode: IntegrationMode::Trapezoidal,
            accumulation: Accumulation::Unbounded,
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.mv_max > 0.0 && self.mv_max.is_finite()) {
            return Err(Error::InvalidParams("mv_max must be positive"));
        }
        if !(self.min_pulse_secs >= 0.0 && self.min_pulse_secs.is_finite()) {
            return Err(Error::InvalidParams("min_pulse_secs must not be negative"));
        }
        match self.accumulation {
            Accumulation::Windowed(0) => {
                return Err(Error::InvalidParams("integral window must hold at least one sample"))
            }
            Accumulation::Windowed(n) if n > MAX_SETPOINTS => {
                return Err(Error::InvalidParams("integral window is longer than any run"))
            }
            _ => {}
        }
        Ok(())
    }
}

impl StatusStore {
    /// Validate a profile and claim the store for a new run.
    ///
    /// Nothing is executed yet: the returned [`ControlRun`] has to be driven
    /// with [`ControlRun::execute`] on whatever task the host dedicates to it.
    /// Fails without touching the store when the input is invalid or another
    /// run is still `Running`.
    pub fn start_run(
        &self,
        anchors: &[AnchorPoint],
        params: PidParams,
        config: ControlConfig,
    ) -> Result<ControlRun<'_>, Error> {
        params.validate()?;
        config.validate()?;

        let setpoints = profile::interpolate(anchors, params.dt)?;
        if setpoints.is_empty() {
            return Err(ProfileError::NoSetpoints.into());
        }

        let controller = PidController::new(params)?
            .with_mv_max(config.mv_max)
            .with_mode(config.mode)
            .with_accumulation(config.accumulation);

        let run_id = self.begin_run(Recipe {
            anchors: anchors.to_vec(),
            params,
            setpoints: setpoints.clone(),
        })?;

        info!(
            "Run {} accepted: {} setpoints, kp={}, ki={}, kd={}, dt={}",
            run_id,
            setpoints.len(),
            params.kp,
            params.ki,
            params.kd,
            params.dt
        );

        Ok(ControlRun {
            store: self,
            run_id,
            setpoints,
            controller,
            config,
            settled: false,
        })
    }
}

/// Observer side of a run: query its state or ask it to stop.
#[derive(Clone, Copy)]
pub struct RunHandle<'a> {
    store: &'a StatusStore,
    run_id: u32,
}

impl<'a> RunHandle<'a> {
    /// Ask the run to stop at the next tick boundary. Returns `false` when
    /// this run is no longer the active one.
    pub fn request_cancel(&self) -> bool {
        let accepted = self.store.request_cancel(self.run_id);
        if accepted {
            info!("Cancellation requested for run {}", self.run_id);
        }
        accepted
    }

    /// State of the store. Once a newer run has started this reports the
    /// newer run.
    pub fn current_state(&self) -> RunState {
        self.store.state()
    }

    pub fn is_current(&self) -> bool {
        self.store.current_run() == self.run_id
    }

    pub fn run_id(&self) -> u32 {
        self.run_id
    }

    pub fn store(&self) -> &'a StatusStore {
        self.store
    }
}

enum Exit {
    Completed,
    Cancelled { ticks: usize },
}

/// A validated run that owns its controller until it reaches a terminal
/// state.
pub struct ControlRun<'a> {
    store: &'a StatusStore,
    run_id: u32,
    setpoints: Vec<Setpoint>,
    controller: PidController,
    config: ControlConfig,
    settled: bool,
}

impl<'a> ControlRun<'a> {
    pub fn handle(&self) -> RunHandle<'a> {
        RunHandle {
            store: self.store,
            run_id: self.run_id,
        }
    }

    pub fn setpoints(&self) -> &[Setpoint] {
        &self.setpoints
    }

    /// Drive the loop to completion, cancellation or failure.
    ///
    /// The heater is switched off before the terminal state is published, and
    /// also if this future is dropped part way through.
    pub async fn execute<S, H, D>(mut self, sensor: S, heater: H, delay: D) -> RunState
    where
        S: TemperatureSensor,
        H: Heater,
        D: DelayNs,
    {
        let mut heater = HeaterGuard::new(heater);
        let outcome = self.run_ticks(sensor, &mut heater, delay).await;
        heater.off();
        drop(heater);

        let state = match outcome {
            Ok(Exit::Completed) => {
                info!("Run {} finished", self.run_id);
                RunState::Finished
            }
            Ok(Exit::Cancelled { ticks }) => {
                warn!("Run {} killed after {} ticks", self.run_id, ticks);
                RunState::Killed
            }
            Err(e) => {
                error!("Run {} aborted: {}", self.run_id, e);
                RunState::error(e)
            }
        };

        self.store.publish_state(state.clone());
        self.settled = true;
        state
    }

    async fn run_ticks<S, H, D>(
        &mut self,
        mut sensor: S,
        heater: &mut HeaterGuard<H>,
        mut delay: D,
    ) -> Result<Exit, SensorError>
    where
        S: TemperatureSensor,
        H: Heater,
        D: DelayNs,
    {
        let dt = self.controller.params().dt;

        for (tick, setpoint) in self.setpoints.iter().enumerate() {
            let timestamp = Instant::now().as_millis();

            // Read once; the same value feeds the error and the record
            let current_temp = sensor.read_temperature().await?;
            if !current_temp.is_finite() {
                return Err(SensorError::DataFormat);
            }

            let state = self.controller.update(setpoint.temperature - current_temp);
            let duty = duty::schedule_with_min_pulse(
                state.manipulated_variable,
                dt,
                self.config.mv_max,
                self.config.min_pulse_secs,
            );

            self.store.append_record(StatusRecord {
                elapsed_time: tick as f32 * dt,
                target_temp: setpoint.temperature,
                current_temp,
                timestamp,
                power_on_time: duty.on,
                run_state: RunState::Running,
                mv: state.manipulated_variable,
                proportional_term: state.proportional_term,
                integral_term: state.integral_term,
                derivative_term: state.derivative_term,
                accumulated_integral: state.accumulated_integral,
            });
            debug!(
                "tick {}: target={} current={} mv={} on={}s",
                tick, setpoint.temperature, current_temp, state.manipulated_variable, duty.on
            );

            actuate(heater, &mut delay, duty, dt).await;

            // Cancellation is only observed between ticks
            if self.store.cancel_requested(self.run_id) {
                return Ok(Exit::Cancelled { ticks: tick + 1 });
            }
        }

        Ok(Exit::Completed)
    }
}

impl Drop for ControlRun<'_> {
    fn drop(&mut self) {
        if !self.settled {
            error!("Run {} dropped before it finished", self.run_id);
            self.store.publish_state(RunState::error("run abandoned"));
        }
    }
}

async fn actuate<H: Heater, D: DelayNs>(
    heater: &mut HeaterGuard<H>,
    delay: &mut D,
    duty: DutySchedule,
    dt: f32,
) {
    if duty.is_off() {
        heater.off();
        wait(delay, dt).await;
        return;
    }

    heater.on();
    wait(delay, duty.on).await;
    if duty.off > 0.0 {
        heater.off();
        wait(delay, duty.off).await;
    }
}

async fn wait<D: DelayNs>(delay: &mut D, secs: f32) {
    // Split so intervals beyond u32::MAX microseconds are not truncated
    let mut remaining = (secs as f64 * 1_000_000.0).round() as u64;
    while remaining > 0 {
        let chunk = remaining.min(u32::MAX as u64);
        delay.delay_us(chunk as u32).await;
        remaining -= chunk;
    }
}
