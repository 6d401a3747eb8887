/*!
 * LabFlow Devices
 *
 * This crate talks to laboratory instruments over byte-oriented serial
 * links: an exclusive-access transport, one protocol codec and one driver
 * per instrument family, concurrent discovery, and a registry that owns the
 * discovered drivers.
 */

#![warn(missing_docs)]

// Re-export core types
pub use labflow_core::prelude;

pub mod device;
pub mod devices;
pub mod discovery;
pub mod history;
pub mod protocol;
pub mod protocols;
pub mod registry;
pub mod sim;
pub mod transport;

#[cfg(feature = "serial")]
pub mod serial;

pub use device::{DeviceError, DeviceType, Direction, Driver, DriverBase};
pub use devices::{DensitometerDriver, PumpDriver};
pub use discovery::{DeviceDiscoverer, DiscoveredDevice, DiscoveryOptions};
pub use history::{History, InstantEvent, JournalExport, StateRecord};
pub use protocol::{CommandFrame, ProtocolHandler, ProtocolRegistry};
pub use registry::{DeviceRegistry, RegisteredDevice, RegistryEvent};
pub use transport::{Channel, Connector, StreamChannel, Transport};

#[cfg(feature = "serial")]
pub use serial::SerialConnector;

/// LabFlow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), labflow_core::error::Error> {
    tracing::info!("LabFlow Devices {} initialized", VERSION);
    Ok(())
}

/// Names of the instrument protocols probed during discovery, in order
pub fn available_protocols() -> Vec<&'static str> {
    ProtocolRegistry::with_defaults()
        .handlers()
        .iter()
        .map(|handler| handler.name())
        .collect()
}

/// Names of the transports compiled into this build
pub fn available_transports() -> Vec<&'static str> {
    let mut transports = vec!["sim"];

    #[cfg(feature = "serial")]
    transports.push("serial");

    transports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_protocols() {
        assert_eq!(available_protocols(), vec!["pump", "densitometer"]);
    }

    #[test]
    fn test_available_transports() {
        let transports = available_transports();
        assert!(transports.contains(&"sim"));
        #[cfg(feature = "serial")]
        assert!(transports.contains(&"serial"));
    }
}
