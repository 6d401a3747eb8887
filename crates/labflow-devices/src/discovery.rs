/*!
 * Device discovery for LabFlow.
 *
 * Instruments carry no self-description, so discovery sends every known
 * identification probe to every candidate port and keeps the first exact
 * reply. Ports are probed concurrently and independently.
 */
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

use labflow_core::config::DiscoveryConfig;
use labflow_core::logging::component_span;

use crate::device::{DeviceType, Result};
use crate::protocol::{ProtocolHandler, ProtocolRegistry};
use crate::transport::{Connector, Transport};

/// An instrument identified on a port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// The identified family
    pub device_type: DeviceType,
    /// The port it answered on
    pub port: String,
}

/// Discovery options
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryOptions {
    /// Baud rate used for every probe
    pub baud_rate: u32,
    /// Deadline for each identification reply
    pub timeout: Duration,
    /// Ports always probed in addition to the explicit or enumerated ones
    pub extra_ports: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for DiscoveryOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            timeout: config.timeout(),
            extra_ports: config.extra_ports.clone(),
        }
    }
}

/// Device discoverer
///
/// Probes ports through a [`Connector`] using the handlers of a
/// [`ProtocolRegistry`] in priority order.
#[derive(Debug, Clone)]
pub struct DeviceDiscoverer {
    connector: Arc<dyn Connector>,
    protocols: Arc<ProtocolRegistry>,
}

impl DeviceDiscoverer {
    /// Create a new device discoverer with the built-in protocols
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_protocols(connector, ProtocolRegistry::with_defaults())
    }

    /// Create a new device discoverer with a custom protocol list
    pub fn with_protocols(connector: Arc<dyn Connector>, protocols: ProtocolRegistry) -> Self {
        Self {
            connector,
            protocols: Arc::new(protocols),
        }
    }

    /// The protocols tried on each port, in order
    pub fn protocols(&self) -> &ProtocolRegistry {
        &self.protocols
    }

    /// Ports to probe: `explicit` (or the enumerated ports when `None`),
    /// then `extra`, keeping the first occurrence of each
    pub fn candidate_ports(&self, explicit: Option<Vec<String>>, extra: &[String]) -> Vec<String> {
        let base = explicit.unwrap_or_else(|| self.connector.available_ports());
        let mut seen = HashSet::new();
        base.into_iter()
            .chain(extra.iter().cloned())
            .filter(|port| seen.insert(port.clone()))
            .collect()
    }

    /// Find every instrument reachable from the candidate ports
    pub async fn discover(
        &self,
        ports: Option<Vec<String>>,
        options: &DiscoveryOptions,
    ) -> Vec<DiscoveredDevice> {
        let candidates = self.candidate_ports(ports, &options.extra_ports);
        self.discover_ports(candidates, options).await
    }

    /// Probe exactly `ports`, one task per port
    ///
    /// The result has no particular order. A port that fails, times out or
    /// whose probe task panics contributes nothing.
    pub async fn discover_ports(
        &self,
        ports: Vec<String>,
        options: &DiscoveryOptions,
    ) -> Vec<DiscoveredDevice> {
        debug!(candidates = ?ports, "Starting discovery");

        let mut probes = JoinSet::new();
        for port in ports {
            let span = component_span("probe", Some(&port));
            let discoverer = self.clone();
            let options = options.clone();
            probes.spawn(async move { discoverer.probe_port(&port, &options).await }.instrument(span));
        }

        let mut found = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(device)) => found.push(device),
                Ok(None) => {}
                Err(e) => warn!("Probe task failed: {}", e),
            }
        }

        info!(count = found.len(), "Discovery finished");
        found
    }

    /// Identify the instrument on one port, if any
    pub async fn probe_port(&self, port: &str, options: &DiscoveryOptions) -> Option<DiscoveredDevice> {
        for handler in self.protocols.handlers() {
            let transport = Transport::new(port, options.baud_rate, self.connector.clone());
            let outcome = identify(&transport, handler.as_ref(), options.timeout).await;
            transport.close().await;

            match outcome {
                Ok(true) => {
                    info!(%port, device_type = %handler.device_type(), "Identified device");
                    return Some(DiscoveredDevice {
                        device_type: handler.device_type(),
                        port: port.to_string(),
                    });
                }
                Ok(false) => debug!(%port, protocol = handler.name(), "Identification mismatch"),
                Err(e) => debug!(%port, protocol = handler.name(), "Probe failed: {}", e),
            }
        }
        None
    }
}

async fn identify(
    transport: &Transport,
    handler: &dyn ProtocolHandler,
    timeout: Duration,
) -> Result<bool> {
    transport.open().await?;
    let response = transport
        .send_and_receive(
            handler.identification_probe(),
            handler.identification_response_size(),
            timeout,
        )
        .await?;
    Ok(handler.parse_identification_response(&response))
}
