//! Software PWM: one relay pulse per sample interval.

use serde::Serialize;

use crate::MIN_PULSE_SECS;

/// On/off timing within one sample interval, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DutySchedule {
    pub on: f32,
    pub off: f32,
}

impl DutySchedule {
    pub fn is_off(&self) -> bool {
        self.on == 0.0
    }
}

/// Map `mv` onto an on-time proportional to `mv / mv_max` of `dt`.
pub fn schedule(mv: f32, dt: f32, mv_max: f32) -> DutySchedule {
    schedule_with_min_pulse(mv, dt, mv_max, MIN_PULSE_SECS)
}

/// Like [`schedule`], with an explicit shortest pulse the relay can honour.
pub fn schedule_with_min_pulse(mv: f32, dt: f32, mv_max: f32, min_pulse: f32) -> DutySchedule {
    let mut on = (dt * mv / mv_max).clamp(0.0, dt);
    // NaN from a degenerate mv never switches the heater on
    if on.is_nan() {
        on = 0.0;
    }
    if on > 0.0 {
        on = on.max(min_pulse).min(dt);
    }

    let off = if on < dt { dt - on } else { 0.0 };
    DutySchedule { on, off }
}
