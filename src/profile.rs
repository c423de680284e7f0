use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{round2, MAX_SETPOINTS};

/// One user supplied corner of the target profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPoint {
    /// Seconds since the start of the run.
    #[serde(rename = "x", alias = "time")]
    pub time: u32,
    #[serde(rename = "y", alias = "temp")]
    pub temperature: f32,
}

impl AnchorPoint {
    pub const fn new(time: u32, temperature: f32) -> Self {
        Self { time, temperature }
    }
}

/// Target temperature for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Setpoint {
    pub time: f32,
    #[serde(rename = "temp")]
    pub temperature: f32,
}

impl Setpoint {
    pub fn reported_temperature(&self) -> f32 {
        round2(self.temperature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileError {
    Empty,
    /// The first anchor does not sit at t = 0.
    NonZeroStart(u32),
    /// The anchor at `index` is earlier than its predecessor.
    NonMonotonic { index: usize },
    NonFiniteTemperature { index: usize },
    InvalidStep,
    /// Interpolation produced no setpoint to run.
    NoSetpoints,
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::Empty => write!(f, "profile has no anchor points"),
            ProfileError::NonZeroStart(t) => write!(f, "profile starts at t={} instead of 0", t),
            ProfileError::NonMonotonic { index } => {
                write!(f, "anchor {} goes back in time", index)
            }
            ProfileError::NonFiniteTemperature { index } => {
                write!(f, "anchor {} has a non-finite temperature", index)
            }
            ProfileError::InvalidStep => {
                write!(f, "sample interval must be positive and yield a bounded run")
            }
            ProfileError::NoSetpoints => write!(f, "profile yields no setpoints"),
        }
    }
}

/// Checks the anchor list without producing setpoints.
pub fn validate(anchors: &[AnchorPoint]) -> Result<(), ProfileError> {
    let first = anchors.first().ok_or(ProfileError::Empty)?;
    if first.time != 0 {
        return Err(ProfileError::NonZeroStart(first.time));
    }

    for (index, anchor) in anchors.iter().enumerate() {
        if !anchor.temperature.is_finite() {
            return Err(ProfileError::NonFiniteTemperature { index });
        }
        if index > 0 && anchor.time < anchors[index - 1].time {
            return Err(ProfileError::NonMonotonic { index });
        }
    }

    Ok(())
}

/// Linearly interpolates `anchors` into one setpoint every `dt` seconds.
///
/// Each segment `[a, b)` is sampled at `a.time + k * dt` while the sample
/// time stays below `b.time`; the last anchor is only reached as a limit, so
/// a single anchor yields an empty sequence. Segments of zero length emit
/// nothing and act as a step change. Invalid input rejects the whole
/// profile.
pub fn interpolate(anchors: &[AnchorPoint], dt: f32) -> Result<Vec<Setpoint>, ProfileError> {
    if !(dt > 0.0 && dt.is_finite()) {
        return Err(ProfileError::InvalidStep);
    }
    validate(anchors)?;

    // Each segment emits at most ceil(span / dt) samples
    let span = anchors.last().map_or(0, |a| a.time) as f64;
    let bound = span / dt as f64 + anchors.len() as f64;
    if bound > MAX_SETPOINTS as f64 {
        return Err(ProfileError::InvalidStep);
    }

    let mut setpoints = Vec::new();
    for pair in anchors.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let span = (b.time - a.time) as f32;

        let mut k: u32 = 0;
        loop {
            // k * dt rather than a running sum keeps long profiles from drifting
            let offset = k as f32 * dt;
            if offset >= span {
                break;
            }
            let temperature = a.temperature + (b.temperature - a.temperature) * offset / span;
            setpoints.push(Setpoint {
                time: a.time as f32 + offset,
                temperature,
            });
            k += 1;
        }
    }

    Ok(setpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn linear_ramp_emits_one_setpoint_per_second() {
        let anchors = [AnchorPoint::new(0, 20.0), AnchorPoint::new(10, 200.0)];
        let setpoints = interpolate(&anchors, 1.0).unwrap();

        assert_eq!(setpoints.len(), 10);
        for (k, sp) in setpoints.iter().enumerate() {
            assert!(approx(sp.time, k as f32));
            assert!(approx(sp.temperature, 20.0 + 18.0 * k as f32));
        }
        assert!(approx(setpoints.last().unwrap().temperature, 182.0));
        assert!(setpoints.iter().all(|sp| sp.temperature < 200.0));
    }

    #[test]
    fn non_zero_start_is_rejected() {
        let anchors = [AnchorPoint::new(1, 0.0), AnchorPoint::new(5, 10.0)];
        assert_eq!(
            interpolate(&anchors, 1.0),
            Err(ProfileError::NonZeroStart(1))
        );
    }

    #[test]
    fn time_going_backwards_is_rejected() {
        let anchors = [
            AnchorPoint::new(0, 0.0),
            AnchorPoint::new(3, 10.0),
            AnchorPoint::new(2, 5.0),
        ];
        assert_eq!(
            interpolate(&anchors, 1.0),
            Err(ProfileError::NonMonotonic { index: 2 })
        );
    }

    #[test]
    fn empty_profile_is_rejected() {
        assert_eq!(interpolate(&[], 1.0), Err(ProfileError::Empty));
    }

    #[test]
    fn single_anchor_yields_nothing() {
        let setpoints = interpolate(&[AnchorPoint::new(0, 25.0)], 1.0).unwrap();
        assert!(setpoints.is_empty());
    }

    #[test]
    fn repeated_time_is_a_step_change() {
        let anchors = [
            AnchorPoint::new(0, 100.0),
            AnchorPoint::new(2, 100.0),
            AnchorPoint::new(2, 150.0),
            AnchorPoint::new(4, 150.0),
        ];
        let temps: Vec<f32> = interpolate(&anchors, 1.0)
            .unwrap()
            .iter()
            .map(|sp| sp.temperature)
            .collect();
        assert_eq!(temps, vec![100.0, 100.0, 150.0, 150.0]);
    }

    #[test]
    fn fractional_step_covers_segment() {
        let anchors = [AnchorPoint::new(0, 0.0), AnchorPoint::new(2, 10.0)];
        let setpoints = interpolate(&anchors, 0.5).unwrap();

        assert_eq!(setpoints.len(), 4);
        assert!(approx(setpoints[3].time, 1.5));
        assert!(approx(setpoints[3].temperature, 7.5));
    }

    #[test]
    fn bad_step_and_nan_are_rejected() {
        let anchors = [AnchorPoint::new(0, 0.0), AnchorPoint::new(2, f32::NAN)];
        assert_eq!(
            interpolate(&anchors, 1.0),
            Err(ProfileError::NonFiniteTemperature { index: 1 })
        );
        let anchors = [AnchorPoint::new(0, 0.0), AnchorPoint::new(2, 1.0)];
        assert_eq!(interpolate(&anchors, 0.0), Err(ProfileError::InvalidStep));
        assert_eq!(interpolate(&anchors, -1.0), Err(ProfileError::InvalidStep));
    }

    #[test]
    fn tiny_step_is_rejected_before_allocating() {
        let anchors = [AnchorPoint::new(0, 25.0), AnchorPoint::new(330, 50.0)];
        assert_eq!(interpolate(&anchors, 1e-8), Err(ProfileError::InvalidStep));
        assert_eq!(interpolate(&anchors, 0.001).unwrap().len(), 330_000);
    }

    #[test]
    fn reporting_rounds_to_two_decimals() {
        let anchors = [AnchorPoint::new(0, 0.0), AnchorPoint::new(3, 1.0)];
        let setpoints = interpolate(&anchors, 1.0).unwrap();
        assert!(approx(setpoints[1].reported_temperature(), 0.33));
        assert!(setpoints[1].temperature != setpoints[1].reported_temperature());
    }
}
