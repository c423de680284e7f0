//! Discrete PID controller for heater duty.
//!
//! - Uses `f32` math at a fixed sample interval `dt`
//! - Caller supplies the tracking error (`setpoint - measurement`)
//! - Output clamped to `[0, mv_max]`
//! - Integral anti-windup by freezing accumulation while saturated
//! - Trapezoidal integration of the error, backward-difference derivative
//!
//! Example
//! ```
//! use profile_oven::pid::{PidController, PidParams};
//!
//! let params = PidParams { kp: 10.0, ki: 0.1, kd: 18.0, dt: 1.0 };
//! let mut pid = PidController::new(params).unwrap().with_mv_max(1000.0);
//!
//! let state = pid.update(150.0 - 25.0);
//! assert!(state.manipulated_variable <= 1000.0);
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::log::*;
use crate::{Error, DEFAULT_PID_PARAMS, INTEGRAL_WINDOW, MV_MAX};

/// Gains and sample interval, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Sample interval in seconds.
    pub dt: f32,
}

impl PidParams {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()) {
            return Err(Error::InvalidParams("gains must be finite"));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(Error::InvalidParams("dt must be a positive number of seconds"));
        }
        Ok(())
    }
}

impl Default for PidParams {
    fn default() -> Self {
        DEFAULT_PID_PARAMS
    }
}

/// How the integral and output are formed each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMode {
    /// Positional form with trapezoidal integration of the error.
    #[default]
    Trapezoidal,
    /// Velocity form: the output moves by an increment from its last value.
    Incremental,
}

/// Which error increments make up the integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accumulation {
    #[default]
    Unbounded,
    /// Only the most recent `n` increments count.
    Windowed(usize),
}

impl Accumulation {
    /// Window over the last [`INTEGRAL_WINDOW`] samples.
    pub const fn default_window() -> Self {
        Accumulation::Windowed(INTEGRAL_WINDOW)
    }
}

/// Snapshot of the controller after an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ControllerState {
    pub manipulated_variable: f32,
    pub proportional_term: f32,
    pub integral_term: f32,
    pub derivative_term: f32,
    /// Raw error integral before the `ki` gain is applied.
    pub accumulated_integral: f32,
    pub previous_error: f32,
    pub previous_mv: f32,
    pub is_saturated: bool,
}

#[derive(Debug, Clone)]
pub struct PidController {
    params: PidParams,
    mv_max: f32,
    mode: IntegrationMode,
    accumulation: Accumulation,

    // State
    state: ControllerState,
    window: VecDeque<f32>,
    // Error from two ticks ago, only read by the incremental form
    error_before_previous: f32,
}

impl PidController {
    /// Create a controller with the default output limit, trapezoidal
    /// integration and an unbounded integral.
    pub fn new(params: PidParams) -> Result<Self, Error> {
        params.validate()?;
        Ok(Self {
            params,
            mv_max: MV_MAX,
            mode: IntegrationMode::default(),
            accumulation: Accumulation::default(),
            state: ControllerState::default(),
            window: VecDeque::new(),
            error_before_previous: 0.0,
        })
    }

    /// Builder: set the saturation threshold. Non-positive limits are ignored.
    pub fn with_mv_max(mut self, mv_max: f32) -> Self {
        if mv_max > 0.0 && mv_max.is_finite() {
            self.mv_max = mv_max;
        } else {
            warn!("Ignoring invalid mv limit {}", mv_max);
        }
        self
    }

    pub fn with_mode(mut self, mode: IntegrationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_accumulation(mut self, accumulation: Accumulation) -> Self {
        self.accumulation = accumulation;
        if let Accumulation::Windowed(n) = accumulation {
            // The window fills lazily; never reserve more than a default horizon
            self.window = VecDeque::with_capacity(n.min(INTEGRAL_WINDOW));
        }
        self
    }

    /// Clear accumulators and error memory.
    pub fn reset(&mut self) {
        self.state = ControllerState::default();
        self.window.clear();
        self.error_before_previous = 0.0;
    }

    /// Run one PID step for `error = setpoint - measurement`.
    pub fn update(&mut self, error: f32) -> ControllerState {
        let raw = match self.mode {
            IntegrationMode::Trapezoidal => self.positional_output(error),
            IntegrationMode::Incremental => self.incremental_output(error),
        };

        let (mv, saturated) = saturate(raw, self.mv_max);
        self.state.previous_mv = self.state.manipulated_variable;
        self.state.manipulated_variable = mv;
        self.state.is_saturated = saturated;

        self.error_before_previous = self.state.previous_error;
        self.state.previous_error = error;

        self.state
    }

    fn positional_output(&mut self, error: f32) -> f32 {
        let PidParams { kp, ki, kd, dt } = self.params;
        let previous = self.state.previous_error;

        self.state.proportional_term = kp * error;

        let increment = (error + previous) * dt / 2.0;
        self.accumulate(increment);
        self.state.integral_term = ki * self.state.accumulated_integral;

        self.state.derivative_term = kd * (error - previous) / dt;

        self.state.proportional_term + self.state.integral_term + self.state.derivative_term
    }

    fn incremental_output(&mut self, error: f32) -> f32 {
        let PidParams { kp, ki, kd, dt } = self.params;
        let previous = self.state.previous_error;
        let before = self.error_before_previous;

        self.state.proportional_term = kp * (error - previous);
        self.accumulate(error * dt);
        self.state.integral_term = ki * error * dt;
        self.state.derivative_term = kd * (error - 2.0 * previous + before) / dt;

        // Building on the clamped output keeps the velocity form from winding up
        self.state.manipulated_variable
            + self.state.proportional_term
            + self.state.integral_term
            + self.state.derivative_term
    }

    fn accumulate(&mut self, increment: f32) {
        // Anti-windup: a saturated output freezes the integral
        if self.state.is_saturated {
            return;
        }
        match self.accumulation {
            Accumulation::Unbounded => self.state.accumulated_integral += increment,
            Accumulation::Windowed(n) => {
                self.window.push_back(increment);
                while self.window.len() > n {
                    self.window.pop_front();
                }
                self.state.accumulated_integral = self.window.iter().sum();
            }
        }
    }

    /// Return the last computed state.
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn params(&self) -> PidParams {
        self.params
    }

    pub fn mv_max(&self) -> f32 {
        self.mv_max
    }
}

#[inline]
fn saturate(raw: f32, mv_max: f32) -> (f32, bool) {
    if raw > mv_max {
        (mv_max, true)
    } else if raw < 0.0 {
        (0.0, true)
    } else {
        (raw, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(kp: f32, ki: f32, kd: f32, dt: f32) -> PidParams {
        PidParams { kp, ki, kd, dt }
    }

    #[test]
    fn rejects_bad_params() {
        assert!(matches!(
            PidController::new(params(1.0, 1.0, 1.0, 0.0)),
            Err(Error::InvalidParams(_))
        ));
        assert!(matches!(
            PidController::new(params(1.0, 1.0, 1.0, -1.0)),
            Err(Error::InvalidParams(_))
        ));
        assert!(matches!(
            PidController::new(params(f32::NAN, 1.0, 1.0, 1.0)),
            Err(Error::InvalidParams(_))
        ));
        assert!(matches!(
            PidController::new(params(1.0, f32::INFINITY, 1.0, 1.0)),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn terms_follow_the_textbook_formulas() {
        let mut pid = PidController::new(params(2.0, 0.5, 3.0, 0.5)).unwrap();

        let s = pid.update(4.0);
        assert_eq!(s.proportional_term, 8.0);
        // (4 + 0) * 0.5 / 2
        assert_eq!(s.accumulated_integral, 1.0);
        assert_eq!(s.integral_term, 0.5);
        // 3 * (4 - 0) / 0.5
        assert_eq!(s.derivative_term, 24.0);
        assert_eq!(s.manipulated_variable, 32.5);
        assert!(!s.is_saturated);
        assert_eq!(s.previous_error, 4.0);

        let s = pid.update(2.0);
        assert_eq!(s.accumulated_integral, 2.5);
        assert_eq!(s.derivative_term, -12.0);
        assert_eq!(s.previous_mv, 32.5);
    }

    #[test]
    fn integral_grows_under_constant_error() {
        let mut pid = PidController::new(params(0.1, 0.01, 0.0, 1.0)).unwrap();
        let mut last = pid.state().accumulated_integral;
        for _ in 0..20 {
            let s = pid.update(5.0);
            assert!(!s.is_saturated);
            assert!(s.accumulated_integral > last);
            last = s.accumulated_integral;
        }
    }

    #[test]
    fn saturation_freezes_the_integral() {
        let mut pid = PidController::new(params(10.0, 1.0, 0.0, 1.0))
            .unwrap()
            .with_mv_max(100.0);

        let s = pid.update(20.0);
        assert_eq!(s.manipulated_variable, 100.0);
        assert!(s.is_saturated);
        let frozen = s.accumulated_integral;
        assert_eq!(frozen, 10.0);

        // still saturated: accumulator must not move
        let s = pid.update(20.0);
        assert!(s.is_saturated);
        assert_eq!(s.accumulated_integral, frozen);

        // back inside the limits, still frozen for this tick
        let s = pid.update(1.0);
        assert!(!s.is_saturated);
        assert_eq!(s.accumulated_integral, frozen);

        // negative errors drain it once desaturated
        let s = pid.update(-1.0);
        assert_eq!(s.accumulated_integral, frozen);
        let s = pid.update(-1.0);
        assert!(s.accumulated_integral < frozen);
    }

    #[test]
    fn output_clamps_at_zero() {
        let mut pid = PidController::new(params(1.0, 0.0, 0.0, 1.0)).unwrap();
        let s = pid.update(-50.0);
        assert_eq!(s.manipulated_variable, 0.0);
        assert!(s.is_saturated);
    }

    #[test]
    fn reset_clears_memory() {
        let mut pid = PidController::new(params(1.0, 1.0, 1.0, 1.0)).unwrap();
        pid.update(3.0);
        pid.update(4.0);
        pid.reset();
        assert_eq!(*pid.state(), ControllerState::default());
    }

    #[test]
    fn windowed_integral_forgets_old_error() {
        let mut pid = PidController::new(params(0.0, 1.0, 0.0, 1.0))
            .unwrap()
            .with_accumulation(Accumulation::Windowed(3));

        pid.update(2.0); // 1
        pid.update(2.0); // 2
        pid.update(2.0); // 2
        let s = pid.update(0.0); // 1, drops the first
        assert_eq!(s.accumulated_integral, 5.0);
        let s = pid.update(0.0);
        assert_eq!(s.accumulated_integral, 3.0);
    }

    #[test]
    fn saturation_freezes_the_window() {
        let mut pid = PidController::new(params(1.0, 1.0, 0.0, 1.0))
            .unwrap()
            .with_mv_max(10.0)
            .with_accumulation(Accumulation::Windowed(2));

        pid.update(4.0); // [2]
        let s = pid.update(4.0); // [2, 4]
        assert_eq!(s.manipulated_variable, 10.0);
        assert!(!s.is_saturated);
        let s = pid.update(4.0); // [4, 4]
        assert!(s.is_saturated);
        assert_eq!(s.accumulated_integral, 8.0);

        // frozen: nothing pushed, nothing dropped
        let s = pid.update(4.0);
        assert_eq!(s.accumulated_integral, 8.0);
        let s = pid.update(-4.0);
        assert!(!s.is_saturated);
        assert_eq!(s.accumulated_integral, 8.0);

        // [4, -4]; had the frozen ticks been pushed this would be [0, -4]
        let s = pid.update(-4.0);
        assert_eq!(s.accumulated_integral, 0.0);
    }

    #[test]
    fn huge_window_does_not_reserve_up_front() {
        let mut pid = PidController::new(params(0.0, 1.0, 0.0, 1.0))
            .unwrap()
            .with_accumulation(Accumulation::Windowed(usize::MAX));
        let s = pid.update(2.0);
        assert_eq!(s.accumulated_integral, 1.0);
        assert_eq!(
            Accumulation::default_window(),
            Accumulation::Windowed(INTEGRAL_WINDOW)
        );
    }

    #[test]
    fn incremental_mode_steps_from_last_output() {
        let mut pid = PidController::new(params(1.0, 1.0, 0.0, 1.0))
            .unwrap()
            .with_mode(IntegrationMode::Incremental)
            .with_mv_max(50.0);

        // 1*(4-0) + 1*4*1
        let s = pid.update(4.0);
        assert_eq!(s.manipulated_variable, 8.0);
        // 8 + 1*(4-4) + 4
        let s = pid.update(4.0);
        assert_eq!(s.manipulated_variable, 12.0);

        for _ in 0..20 {
            pid.update(4.0);
        }
        assert_eq!(pid.state().manipulated_variable, 50.0);
        assert!(pid.state().is_saturated);

        // leaves saturation as soon as the error turns
        let s = pid.update(-4.0);
        assert!(s.manipulated_variable < 50.0);
    }

    #[test]
    fn invalid_mv_max_is_ignored() {
        let pid = PidController::new(PidParams::default())
            .unwrap()
            .with_mv_max(-3.0);
        assert_eq!(pid.mv_max(), MV_MAX);
    }
}
