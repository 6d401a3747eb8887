/*!
 * Optical-density meter driver.
 */
use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use labflow_core::config::DensitometerConfig;
use labflow_core::params;

use crate::device::{DeviceType, Driver, DriverBase, Result};
use crate::history::History;
use crate::protocols::DensitometerProtocol;
use crate::transport::Transport;

/// Journal state opened while a measurement settles
pub const STATE_MEASURING_OD: &str = "measuring_od";
/// Journal event for a temperature reading
pub const EVENT_GET_TEMPERATURE: &str = "get_temperature";
/// Journal event for an optical density reading
pub const EVENT_GET_OD: &str = "get_od";

/// Driver for a densitometer
pub struct DensitometerDriver {
    base: DriverBase,
    protocol: DensitometerProtocol,
    measurement_delay: Duration,
    response_timeout: Duration,
}

impl fmt::Debug for DensitometerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DensitometerDriver")
            .field("port", &self.base.transport().port())
            .field("measurement_delay", &self.measurement_delay)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl DensitometerDriver {
    /// Create a new densitometer driver with default timing
    pub fn new(transport: Transport) -> Self {
        Self::with_config(transport, &DensitometerConfig::default())
    }

    /// Create a new densitometer driver with configured timing
    pub fn with_config(transport: Transport, config: &DensitometerConfig) -> Self {
        Self {
            base: DriverBase::new(transport, History::new()),
            protocol: DensitometerProtocol,
            measurement_delay: config.measurement_delay(),
            response_timeout: config.response_timeout(),
        }
    }

    /// Settling delay between starting and reading a measurement
    pub fn measurement_delay(&self) -> Duration {
        self.measurement_delay
    }

    /// Deadline for each value response
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Read the sensor temperature in degrees Celsius
    pub async fn get_temperature(&self) -> Result<f64> {
        let response = self
            .base
            .send_and_receive(
                &self.protocol.encode_temperature_request(),
                self.protocol.value_response_size(),
                self.response_timeout,
            )
            .await?;
        let temperature_c = self.protocol.decode_value(&response)?;

        self.base.history().record_event(
            EVENT_GET_TEMPERATURE,
            params! { "temperature_c" => temperature_c },
        );
        debug!(port = %self.port(), temperature_c, "Temperature read");
        Ok(temperature_c)
    }

    /// Measure optical density
    ///
    /// Holds the "measuring_od" state for the settling delay. The wait is not
    /// cancellable. If the read-back fails the state stays open.
    pub async fn get_od(&self) -> Result<f64> {
        self.base
            .send_command(&self.protocol.encode_start_measurement())
            .await?;
        self.base.history().start_state(STATE_MEASURING_OD, params!());

        tokio::time::sleep(self.measurement_delay).await;

        let response = self
            .base
            .send_and_receive(
                &self.protocol.encode_od_request(),
                self.protocol.value_response_size(),
                self.response_timeout,
            )
            .await?;
        let absorbance = self.protocol.decode_value(&response)?;

        let history = self.base.history();
        history.end_current_state();
        history.record_event(EVENT_GET_OD, params! { "absorbance" => absorbance });
        info!(port = %self.port(), absorbance, "Optical density measured");
        Ok(absorbance)
    }
}

impl Driver for DensitometerDriver {
    fn base(&self) -> &DriverBase {
        &self.base
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Densitometer
    }
}
