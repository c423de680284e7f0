use core::fmt;

/// Thermocouple read failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    /// The bus transaction itself failed.
    Bus,
    /// Probe not connected or shorted.
    OpenCircuit,
    /// The converter returned something that is not a temperature.
    DataFormat,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Bus => write!(f, "sensor bus error"),
            SensorError::OpenCircuit => write!(f, "thermocouple open circuit"),
            SensorError::DataFormat => write!(f, "sensor returned invalid data"),
        }
    }
}

impl std::error::Error for SensorError {}

/// Source of the process temperature, in degrees Celsius.
#[allow(async_fn_in_trait)]
pub trait TemperatureSensor {
    async fn read_temperature(&mut self) -> Result<f32, SensorError>;
}

impl<T: TemperatureSensor> TemperatureSensor for &mut T {
    async fn read_temperature(&mut self) -> Result<f32, SensorError> {
        (**self).read_temperature().await
    }
}
