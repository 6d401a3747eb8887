/*!
 * Device registry for LabFlow.
 *
 * The registry runs discovery, opens a long-lived transport for every
 * identified instrument, and keeps the resulting drivers under generated
 * names such as `pump_0` or `densitometer_1`. It is the only owner allowed to
 * close those transports.
 */
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn, Instrument};

use labflow_core::config::{Config, DensitometerConfig};
use labflow_core::logging::operation_span;

use crate::device::{DeviceError, DeviceType, Driver, Result};
use crate::devices::{DensitometerDriver, PumpDriver};
use crate::discovery::{DeviceDiscoverer, DiscoveredDevice, DiscoveryOptions};
use crate::protocol::ProtocolRegistry;
use crate::transport::{Connector, Transport};

/// A registered driver, tagged by family
#[derive(Debug, Clone)]
pub enum RegisteredDevice {
    /// A pump
    Pump(Arc<PumpDriver>),
    /// A densitometer
    Densitometer(Arc<DensitometerDriver>),
}

impl RegisteredDevice {
    /// The family of the wrapped driver
    pub fn device_type(&self) -> DeviceType {
        match self {
            RegisteredDevice::Pump(_) => DeviceType::Pump,
            RegisteredDevice::Densitometer(_) => DeviceType::Densitometer,
        }
    }

    /// The wrapped driver through the shared interface
    pub fn driver(&self) -> &dyn Driver {
        match self {
            RegisteredDevice::Pump(driver) => driver.as_ref(),
            RegisteredDevice::Densitometer(driver) => driver.as_ref(),
        }
    }

    /// The port the driver is attached to
    pub fn port(&self) -> &str {
        self.driver().port()
    }

    /// The pump driver, if this is a pump
    pub fn as_pump(&self) -> Option<&Arc<PumpDriver>> {
        match self {
            RegisteredDevice::Pump(driver) => Some(driver),
            _ => None,
        }
    }

    /// The densitometer driver, if this is a densitometer
    pub fn as_densitometer(&self) -> Option<&Arc<DensitometerDriver>> {
        match self {
            RegisteredDevice::Densitometer(driver) => Some(driver),
            _ => None,
        }
    }
}

/// Event types for the device registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A device was registered
    DeviceAdded {
        /// The generated name
        name: String,
        /// The device family
        device_type: DeviceType,
        /// The port the device is attached to
        port: String,
    },
    /// Every device was disconnected and removed
    DevicesCleared,
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<String, RegisteredDevice>,
    // next ordinal per family; survives close()
    ordinals: HashMap<DeviceType, usize>,
}

/// Device registry
#[derive(Debug)]
pub struct DeviceRegistry {
    options: DiscoveryOptions,
    densitometer: DensitometerConfig,
    connector: Arc<dyn Connector>,
    discoverer: DeviceDiscoverer,
    inner: RwLock<Inner>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    /// Create a new device registry with the built-in protocols
    pub fn new(config: &Config, connector: Arc<dyn Connector>) -> Self {
        Self::with_protocols(config, connector, ProtocolRegistry::with_defaults())
    }

    /// Create a new device registry with a custom protocol list
    pub fn with_protocols(
        config: &Config,
        connector: Arc<dyn Connector>,
        protocols: ProtocolRegistry,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            options: DiscoveryOptions::from(&config.discovery),
            densitometer: config.devices.densitometer.clone(),
            discoverer: DeviceDiscoverer::with_protocols(connector.clone(), protocols),
            connector,
            inner: RwLock::new(Inner::default()),
            event_sender,
        }
    }

    /// Create a new device registry on the host's serial ports
    #[cfg(feature = "serial")]
    pub fn with_serial(config: &Config) -> Self {
        Self::new(config, Arc::new(crate::serial::SerialConnector::new()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| {
            DeviceError::Other("Failed to acquire read lock on device registry".to_string())
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| {
            DeviceError::Other("Failed to acquire write lock on device registry".to_string())
        })
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Discover instruments and register every one found
    ///
    /// `ports` replaces port enumeration when given. Ports already owned by a
    /// registered device are skipped. Returns the full name -> type listing.
    pub async fn discover(&self, ports: Option<Vec<String>>) -> Result<BTreeMap<String, DeviceType>> {
        let owned: Vec<String> = self
            .read()?
            .devices
            .values()
            .map(|device| device.port().to_string())
            .collect();

        let candidates: Vec<String> = self
            .discoverer
            .candidate_ports(ports, &self.options.extra_ports)
            .into_iter()
            .filter(|port| !owned.contains(port))
            .collect();

        let found = self
            .discoverer
            .discover_ports(candidates, &self.options)
            .instrument(operation_span("discover", "registry"))
            .await;
        for device in found {
            self.register(device).await?;
        }

        self.list_devices()
    }

    async fn register(&self, found: DiscoveredDevice) -> Result<()> {
        let transport = Transport::new(&found.port, self.options.baud_rate, self.connector.clone());
        if let Err(e) = transport.open().await {
            warn!(port = %found.port, device_type = %found.device_type, "Skipping device: {}", e);
            return Ok(());
        }

        let device = match found.device_type {
            DeviceType::Pump => RegisteredDevice::Pump(Arc::new(PumpDriver::new(transport))),
            DeviceType::Densitometer => RegisteredDevice::Densitometer(Arc::new(
                DensitometerDriver::with_config(transport, &self.densitometer),
            )),
        };

        let name = {
            let mut inner = match self.write() {
                Ok(inner) => inner,
                Err(e) => {
                    device.driver().base().disconnect().await;
                    return Err(e);
                }
            };
            let already_owned = inner
                .devices
                .values()
                .any(|existing| existing.port() == found.port);
            if already_owned {
                None
            } else {
                let ordinal = inner.ordinals.entry(found.device_type).or_insert(0);
                let name = format!("{}_{}", found.device_type, ordinal);
                *ordinal += 1;
                inner.devices.insert(name.clone(), device.clone());
                Some(name)
            }
        };

        match name {
            Some(name) => {
                info!(%name, port = %found.port, "Registered device");
                let _ = self.event_sender.send(RegistryEvent::DeviceAdded {
                    name,
                    device_type: found.device_type,
                    port: found.port,
                });
            }
            None => {
                debug!(port = %found.port, "Port already registered");
                device.driver().base().disconnect().await;
            }
        }
        Ok(())
    }

    /// Get a device by name
    pub fn get_device(&self, name: &str) -> Result<RegisteredDevice> {
        self.read()?
            .devices
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(format!("No device named {}", name)))
    }

    /// Get a pump by name
    pub fn get_pump(&self, name: &str) -> Result<Arc<PumpDriver>> {
        let device = self.get_device(name)?;
        device.as_pump().cloned().ok_or_else(|| {
            DeviceError::NotFound(format!("{} is a {}, not a pump", name, device.device_type()))
        })
    }

    /// Get a densitometer by name
    pub fn get_densitometer(&self, name: &str) -> Result<Arc<DensitometerDriver>> {
        let device = self.get_device(name)?;
        device.as_densitometer().cloned().ok_or_else(|| {
            DeviceError::NotFound(format!(
                "{} is a {}, not a densitometer",
                name,
                device.device_type()
            ))
        })
    }

    /// All registered names with their device types
    pub fn list_devices(&self) -> Result<BTreeMap<String, DeviceType>> {
        Ok(self
            .read()?
            .devices
            .iter()
            .map(|(name, device)| (name.clone(), device.device_type()))
            .collect())
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.devices.len()).unwrap_or(0)
    }

    /// Whether no device is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect and remove every device; safe to call repeatedly
    pub async fn close(&self) -> Result<()> {
        let devices = std::mem::take(&mut self.write()?.devices);
        if devices.is_empty() {
            return Ok(());
        }

        futures::future::join_all(
            devices
                .values()
                .map(|device| device.driver().base().disconnect()),
        )
        .await;

        info!(count = devices.len(), "Closed all devices");
        let _ = self.event_sender.send(RegistryEvent::DevicesCleared);
        Ok(())
    }
}
