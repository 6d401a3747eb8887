/*!
 * Peristaltic pump protocol.
 *
 * Commands are five-byte frames: an opcode followed by a fixed layout.
 * Speeds travel in byte 3 and volumes in byte 4.
 */
use crate::device::{DeviceType, Direction};
use crate::protocol::{CommandFrame, ProtocolHandler};

const OP_SET_SPEED: u8 = 0x0A;
const OP_ROTATE_LEFT: u8 = 0x0B;
const OP_ROTATE_RIGHT: u8 = 0x0C;
const OP_POUR_LEFT: u8 = 0x10;
const OP_POUR_RIGHT: u8 = 0x11;
const ROTATE_MARKER: u8 = 0x6F;

/// Codec for the pump command set
#[derive(Debug, Clone, Copy, Default)]
pub struct PumpProtocol;

impl PumpProtocol {
    /// Identification probe
    pub const IDENTIFICATION_PROBE: CommandFrame = [0x01, 0x02, 0x03, 0x04, 0xB5];

    /// Reply a pump gives to the probe
    pub const IDENTIFICATION_RESPONSE: [u8; 4] = [0x0A, 0x00, 0x00, 0x00];

    /// Rotate counter-clockwise at `speed`
    pub fn encode_rotate_left(&self, speed: u8) -> CommandFrame {
        [OP_ROTATE_LEFT, ROTATE_MARKER, 0x00, speed, 0x00]
    }

    /// Rotate clockwise at `speed`
    pub fn encode_rotate_right(&self, speed: u8) -> CommandFrame {
        [OP_ROTATE_RIGHT, ROTATE_MARKER, 0x00, speed, 0x00]
    }

    /// Set the rotation speed without starting rotation
    pub fn encode_set_speed(&self, speed: u8) -> CommandFrame {
        [OP_SET_SPEED, 0x00, 0x00, speed, 0x00]
    }

    /// Pour `volume` turning left
    pub fn encode_pour_left(&self, volume: u8) -> CommandFrame {
        [OP_POUR_LEFT, 0x00, 0x00, 0x00, volume]
    }

    /// Pour `volume` turning right
    pub fn encode_pour_right(&self, volume: u8) -> CommandFrame {
        [OP_POUR_RIGHT, 0x00, 0x00, 0x00, volume]
    }

    /// Rotation frame for a direction
    pub fn encode_rotate(&self, direction: Direction, speed: u8) -> CommandFrame {
        match direction {
            Direction::Left => self.encode_rotate_left(speed),
            Direction::Right => self.encode_rotate_right(speed),
        }
    }

    /// Pour frame for a direction
    pub fn encode_pour(&self, direction: Direction, volume: u8) -> CommandFrame {
        match direction {
            Direction::Left => self.encode_pour_left(volume),
            Direction::Right => self.encode_pour_right(volume),
        }
    }
}

impl ProtocolHandler for PumpProtocol {
    fn name(&self) -> &'static str {
        "pump"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Pump
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
