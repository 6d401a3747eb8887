/*!
 * Serial port support.
 *
 * Opens host serial ports as 8N1 without flow control and enumerates the
 * ports discovery should consider.
 */
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::debug;

use crate::transport::{Channel, Connector, StreamChannel};

/// A serial port seen on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub name: String,
    /// USB vendor ID, if known
    pub vid: Option<u16>,
    /// USB product ID, if known
    pub pid: Option<u16>,
    /// Manufacturer string, if known
    pub manufacturer: Option<String>,
    /// Product string, if known
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

// USB CDC adapters first, then USB-serial bridges, then everything else
fn port_sort_key(name: &str) -> (u8, String) {
    let rank = if name.contains("ttyACM") {
        0
    } else if name.contains("ttyUSB") {
        1
    } else {
        2
    };
    (rank, name.to_string())
}

/// List serial ports on the host
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let info = PortInfo::from(info);
        ports.entry(info.name.clone()).or_insert(info);
    }

    // devices the enumeration API sometimes misses
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(file_name) = entry.file_name().to_str() {
                if file_name.starts_with("ttyACM") || file_name.starts_with("ttyUSB") {
                    let path = format!("/dev/{}", file_name);
                    ports
                        .entry(path.clone())
                        .or_insert_with(|| PortInfo::bare(path));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = ports.into_values().collect();
    ports.sort_by_key(|port| port_sort_key(&port.name));
    ports
}

/// Opens host serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl SerialConnector {
    /// Create a new serial connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn Channel>> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;

        debug!(%port, baud_rate, "Opened serial port");
        Ok(Box::new(StreamChannel::new(stream)))
    }

    fn available_ports(&self) -> Vec<String> {
        list_ports().into_iter().map(|port| port.name).collect()
    }
}
