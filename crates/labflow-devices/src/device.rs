/*!
 * Device trait and core device abstractions.
 *
 * This module defines the error type, the identifiers shared by every
 * instrument family, and the driver base that binds a transport to a
 * journal.
 */
use std::fmt::{self, Debug};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use labflow_core::error::Error as CoreError;

use crate::history::History;
use crate::transport::Transport;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The channel could not be opened, is closed, or failed mid-exchange
    #[error("Connection error: {0}")]
    Connection(String),

    /// No complete response arrived before the exchange deadline
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Unknown logical name, or a name bound to a different device type
    #[error("Device not found: {0}")]
    NotFound(String),

    /// A response payload did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),

    /// Core error
    #[error("Core error: {0}")]
    CoreError(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Supported instrument families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Peristaltic pump
    Pump,
    /// Optical-density meter
    Densitometer,
}

impl DeviceType {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Pump => "pump",
            DeviceType::Densitometer => "densitometer",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pump head direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Counter-clockwise
    Left,
    /// Clockwise
    Right,
}

impl Direction {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state of every driver: its transport and its journal
///
/// The base never decodes bytes; concrete drivers hand responses to their
/// protocol handler. Only the owning registry may close the transport:
///
/// ```compile_fail
/// use labflow_devices::{Driver, PumpDriver};
///
/// async fn close(pump: &PumpDriver) {
///     pump.base().disconnect().await;
/// }
/// ```
#[derive(Debug)]
pub struct DriverBase {
    transport: Transport,
    history: History,
}

impl DriverBase {
    /// Bind an opened transport to a journal
    pub fn new(transport: Transport, history: History) -> Self {
        Self { transport, history }
    }

    /// The transport this driver talks through
    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The driver's journal
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Send a frame that has no response
    pub(crate) async fn send_command(&self, frame: &[u8]) -> Result<()> {
        self.transport.send(frame).await
    }

    /// Send a frame and read a fixed-size response
    pub(crate) async fn send_and_receive(
        &self,
        frame: &[u8],
        response_size: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.transport
            .send_and_receive(frame, response_size, timeout)
            .await
    }

    /// Close the transport; only the owning registry does this
    pub(crate) async fn disconnect(&self) {
        self.transport.close().await
    }
}

/// The capability set shared by all instrument drivers
pub trait Driver: Send + Sync + Debug {
    /// Access the shared driver state
    fn base(&self) -> &DriverBase;

    /// The instrument family this driver speaks to
    fn device_type(&self) -> DeviceType;

    /// The port the instrument is attached to
    fn port(&self) -> &str {
        self.base().transport().port()
    }

    /// The driver's journal
    fn history(&self) -> &History {
        self.base().history()
    }

    /// Whether the underlying transport is open
    fn is_connected(&self) -> bool {
        self.base().transport().is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_names() {
        assert_eq!(DeviceType::Pump.to_string(), "pump");
        assert_eq!(DeviceType::Densitometer.as_str(), "densitometer");
        assert_eq!(
            serde_json::to_value(DeviceType::Densitometer).unwrap(),
            serde_json::json!("densitometer")
        );
    }

    #[test]
    fn test_direction_names() {
        assert_eq!(Direction::Left.to_string(), "left");
        let parsed: Direction = serde_json::from_str("\"right\"").unwrap();
        assert_eq!(parsed, Direction::Right);
    }

    #[test]
    fn test_error_display() {
        let err = DeviceError::NotFound("pump_3".to_string());
        assert_eq!(err.to_string(), "Device not found: pump_3");

        let err: DeviceError = CoreError::config("bad").into();
        assert!(matches!(err, DeviceError::CoreError(_)));
    }
}
