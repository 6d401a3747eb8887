/*!
 * Optical-density meter protocol.
 */
use crate::device::{DeviceError, DeviceType, Result};
use crate::protocol::{CommandFrame, ProtocolHandler};

const OP_TEMPERATURE: u8 = 0x4C;
const OP_START_MEASUREMENT: u8 = 0x4E;
const OP_OD_REQUEST: u8 = 0x4F;
const OD_CHANNEL: u8 = 0x04;

/// Codec for the densitometer command set
#[derive(Debug, Clone, Copy, Default)]
pub struct DensitometerProtocol;

impl DensitometerProtocol {
    /// Identification probe
    pub const IDENTIFICATION_PROBE: CommandFrame = [0x01, 0x02, 0x03, 0x04, 0x00];

    /// Reply a densitometer gives to the probe
    pub const IDENTIFICATION_RESPONSE: [u8; 4] = [0x46, 0x00, 0x00, 0x00];

    /// Byte count of a value response
    pub const VALUE_RESPONSE_SIZE: usize = 4;

    /// Ask for the sensor temperature
    pub fn encode_temperature_request(&self) -> CommandFrame {
        [OP_TEMPERATURE, 0x00, 0x00, 0x00, 0x00]
    }

    /// Start an optical density measurement
    pub fn encode_start_measurement(&self) -> CommandFrame {
        [OP_START_MEASUREMENT, OD_CHANNEL, 0x00, 0x00, 0x00]
    }

    /// Read back the last optical density measurement
    pub fn encode_od_request(&self) -> CommandFrame {
        [OP_OD_REQUEST, OD_CHANNEL, 0x00, 0x00, 0x00]
    }

    /// Byte count of a value response
    pub fn value_response_size(&self) -> usize {
        Self::VALUE_RESPONSE_SIZE
    }

    /// Decode a value response: byte 2 is the integer part, byte 3 hundredths
    pub fn decode_value(&self, data: &[u8]) -> Result<f64> {
        if data.len() != Self::VALUE_RESPONSE_SIZE {
            return Err(DeviceError::UnexpectedResponse(format!(
                "expected {} bytes, got {}: {:02X?}",
                Self::VALUE_RESPONSE_SIZE,
                data.len(),
                data
            )));
        }
        Ok(f64::from(data[2]) + f64::from(data[3]) / 100.0)
    }
}

impl ProtocolHandler for DensitometerProtocol {
    fn name(&self) -> &'static str {
        "densitometer"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Densitometer
    }

    fn identification_probe(&self) -> &'static [u8] {
        &Self::IDENTIFICATION_PROBE
    }

    fn identification_response_size(&self) -> usize {
        Self::IDENTIFICATION_RESPONSE.len()
    }

    fn parse_identification_response(&self, data: &[u8]) -> bool {
        data == Self::IDENTIFICATION_RESPONSE
    }
}
