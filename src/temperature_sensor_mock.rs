//! Simulated oven for host runs and tests.
//!
//! One [`OvenModel`] backs both the thermocouple and the relay so the loop
//! sees the temperature respond to its own heater commands.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Instant;

use crate::heater::Heater;
use crate::log::*;
use crate::temperature_sensor::{SensorError, TemperatureSensor};

/// Integration step of the thermal model in seconds.
const MODEL_STEP_SECS: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalParams {
    pub ambient_temp: f32,
    /// Degrees per second with the heater fully on.
    pub max_heating_rate: f32,
    /// Factor affecting heat retention (0-1).
    pub thermal_mass: f32,
    /// Heat loss to ambient per degree difference.
    pub heat_loss_coefficient: f32,
}

impl ThermalParams {
    pub const fn toaster() -> Self {
        Self {
            ambient_temp: 25.0,
            max_heating_rate: 3.0,
            thermal_mass: 0.3,
            heat_loss_coefficient: 0.1,
        }
    }
}

impl Default for ThermalParams {
    fn default() -> Self {
        Self::toaster()
    }
}

struct Thermal {
    params: ThermalParams,
    temperature: f32,
    heater_on: bool,
    last_update: Option<Instant>,
    sensor_fault: Option<SensorError>,
}

impl Thermal {
    fn advance(&mut self, now: Instant) {
        let Some(last) = self.last_update else {
            self.last_update = Some(now);
            return;
        };
        if now <= last {
            return;
        }

        let mut remaining = (now - last).as_micros() as f32 / 1_000_000.0;
        while remaining > 0.0 {
            let step = remaining.min(MODEL_STEP_SECS);
            let heat_input = if self.heater_on {
                self.params.max_heating_rate
            } else {
                0.0
            };
            // Newton's law of cooling
            let heat_loss =
                self.params.heat_loss_coefficient * (self.temperature - self.params.ambient_temp);
            self.temperature += (heat_input - heat_loss) * self.params.thermal_mass * step;
            if self.temperature < self.params.ambient_temp {
                self.temperature = self.params.ambient_temp;
            }
            remaining -= step;
        }
        self.last_update = Some(now);
    }
}

pub struct OvenModel {
    thermal: Mutex<CriticalSectionRawMutex, RefCell<Thermal>>,
}

impl OvenModel {
    pub const fn new(params: ThermalParams) -> Self {
        Self {
            thermal: Mutex::new(RefCell::new(Thermal {
                params,
                temperature: params.ambient_temp,
                heater_on: false,
                last_update: None,
                sensor_fault: None,
            })),
        }
    }

    pub fn thermocouple(&self) -> OvenThermocouple<'_> {
        OvenThermocouple { model: self }
    }

    pub fn relay(&self) -> OvenRelay<'_> {
        OvenRelay { model: self }
    }

    /// Temperature at `now`, integrating the model up to that instant.
    pub fn temperature_at(&self, now: Instant) -> f32 {
        self.thermal.lock(|t| {
            let mut t = t.borrow_mut();
            t.advance(now);
            t.temperature
        })
    }

    pub fn set_heater_at(&self, on: bool, now: Instant) {
        self.thermal.lock(|t| {
            let mut t = t.borrow_mut();
            t.advance(now);
            t.heater_on = on;
        });
    }

    pub fn heater_on(&self) -> bool {
        self.thermal.lock(|t| t.borrow().heater_on)
    }

    /// Make every following read fail with `fault`, or heal with `None`.
    pub fn inject_fault(&self, fault: Option<SensorError>) {
        self.thermal
            .lock(|t| t.borrow_mut().sensor_fault = fault);
    }

    /// Back to ambient with the heater off.
    pub fn reset(&self) {
        info!("Resetting thermal simulation to initial state");
        self.thermal.lock(|t| {
            let mut t = t.borrow_mut();
            t.temperature = t.params.ambient_temp;
            t.heater_on = false;
            t.last_update = None;
            t.sensor_fault = None;
        });
    }

    fn fault(&self) -> Option<SensorError> {
        self.thermal.lock(|t| t.borrow().sensor_fault.clone())
    }
}

pub struct OvenThermocouple<'a> {
    model: &'a OvenModel,
}

impl TemperatureSensor for OvenThermocouple<'_> {
    async fn read_temperature(&mut self) -> Result<f32, SensorError> {
        if let Some(fault) = self.model.fault() {
            return Err(fault);
        }
        Ok(self.model.temperature_at(Instant::now()))
    }
}

pub struct OvenRelay<'a> {
    model: &'a OvenModel,
}

impl Heater for OvenRelay<'_> {
    fn set_power(&mut self, on: bool) {
        self.model.set_heater_at(on, Instant::now());
    }
}
