/*!
 * Peristaltic pump driver.
 */
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, info};

use labflow_core::params;

use crate::device::{DeviceType, Direction, Driver, DriverBase, Result};
use crate::history::History;
use crate::protocols::PumpProtocol;
use crate::transport::Transport;

/// Journal state opened while the head turns
pub const STATE_ROTATING: &str = "rotating";
/// Journal event for a speed change
pub const EVENT_SET_SPEED: &str = "set_speed";
/// Journal event for a dosed pour
pub const EVENT_POUR_VOLUME: &str = "pour_volume";

/// Driver for a peristaltic pump
pub struct PumpDriver {
    base: DriverBase,
    protocol: PumpProtocol,
    stored_speed: AtomicU8,
}

impl fmt::Debug for PumpDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpDriver")
            .field("port", &self.base.transport().port())
            .field("stored_speed", &self.stored_speed())
            .finish()
    }
}

impl PumpDriver {
    /// Create a new pump driver over an opened transport
    pub fn new(transport: Transport) -> Self {
        Self {
            base: DriverBase::new(transport, History::new()),
            protocol: PumpProtocol,
            stored_speed: AtomicU8::new(0),
        }
    }

    /// The speed last set with [`set_rotation_speed`](Self::set_rotation_speed)
    pub fn stored_speed(&self) -> u8 {
        self.stored_speed.load(Ordering::SeqCst)
    }

    /// Start turning the head and open the "rotating" state
    pub async fn start_rotation(&self, speed: u8, direction: Direction) -> Result<()> {
        let frame = self.protocol.encode_rotate(direction, speed);
        self.base.send_command(&frame).await?;

        self.base.history().start_state(
            STATE_ROTATING,
            params! { "direction" => direction.as_str(), "speed" => speed },
        );
        info!(port = %self.port(), %direction, speed, "Pump rotating");
        Ok(())
    }

    /// Stop the head and close the current state
    pub async fn stop_rotation(&self) -> Result<()> {
        let frame = self.protocol.encode_rotate_left(0);
        self.base.send_command(&frame).await?;

        self.base.history().end_current_state();
        info!(port = %self.port(), "Pump stopped");
        Ok(())
    }

    /// Set the rotation speed used by later commands
    pub async fn set_rotation_speed(&self, speed: u8) -> Result<()> {
        let frame = self.protocol.encode_set_speed(speed);
        self.base.send_command(&frame).await?;

        self.stored_speed.store(speed, Ordering::SeqCst);
        self.base
            .history()
            .record_event(EVENT_SET_SPEED, params! { "speed" => speed });
        debug!(port = %self.port(), speed, "Pump speed set");
        Ok(())
    }

    /// Pour `volume` in `direction` at the stored speed
    pub async fn pour_volume(&self, direction: Direction, volume: u8) -> Result<()> {
        let frame = self.protocol.encode_pour(direction, volume);
        self.base.send_command(&frame).await?;

        let speed = self.stored_speed();
        self.base.history().record_event(
            EVENT_POUR_VOLUME,
            params! {
                "direction" => direction.as_str(),
                "volume" => volume,
                "speed" => speed,
            },
        );
        info!(port = %self.port(), %direction, volume, speed, "Pump poured");
        Ok(())
    }
}

impl Driver for PumpDriver {
    fn base(&self) -> &DriverBase {
        &self.base
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Pump
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::device::DeviceError;
    use crate::sim::{SimConnector, SimInstrument};
    use labflow_core::types::ParamValue;

    const PORT: &str = "/dev/ttyUSB0";

    async fn connected_pump() -> (PumpDriver, SimInstrument) {
        let pump = SimInstrument::pump();
        let connector = SimConnector::new().with_instrument(PORT, pump.clone());
        let transport = Transport::new(PORT, 9600, Arc::new(connector));
        transport.open().await.unwrap();
        (PumpDriver::new(transport), pump)
    }

    #[tokio::test]
    async fn test_rotation_lifecycle() {
        let (driver, sim) = connected_pump().await;
        assert_eq!(driver.device_type(), DeviceType::Pump);
        assert_eq!(driver.port(), PORT);

        driver.start_rotation(5, Direction::Left).await.unwrap();
        let state = driver.history().current_state().unwrap();
        assert_eq!(state.name, STATE_ROTATING);
        assert_eq!(state.params["direction"], ParamValue::from("left"));
        assert_eq!(state.params["speed"], ParamValue::Integer(5));

        driver.start_rotation(10, Direction::Right).await.unwrap();
        driver.stop_rotation().await.unwrap();
        assert!(driver.history().current_state().is_none());

        let states = driver.history().get_states(Some(STATE_ROTATING));
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|s| !s.is_open()));

        let frames = sim.wait_for_frames(3).await;
        assert_eq!(
            frames,
            vec![
                [0x0B, 0x6F, 0x00, 0x05, 0x00],
                [0x0C, 0x6F, 0x00, 0x0A, 0x00],
                [0x0B, 0x6F, 0x00, 0x00, 0x00],
            ]
        );
    }

    #[tokio::test]
    async fn test_pour_uses_stored_speed() {
        let (driver, sim) = connected_pump().await;
        assert_eq!(driver.stored_speed(), 0);

        driver.pour_volume(Direction::Left, 50).await.unwrap();
        driver.set_rotation_speed(7).await.unwrap();
        driver.pour_volume(Direction::Right, 3).await.unwrap();
        assert_eq!(driver.stored_speed(), 7);

        let pours = driver.history().get_events(Some(EVENT_POUR_VOLUME));
        assert_eq!(pours.len(), 2);
        assert_eq!(pours[0].params["speed"], ParamValue::Integer(0));
        assert_eq!(pours[0].params["volume"], ParamValue::Integer(50));
        assert_eq!(pours[1].params["speed"], ParamValue::Integer(7));
        assert_eq!(pours[1].params["direction"], ParamValue::from("right"));

        let speeds = driver.history().get_events(Some(EVENT_SET_SPEED));
        assert_eq!(speeds.len(), 1);
        assert_eq!(speeds[0].params["speed"], ParamValue::Integer(7));

        let frames = sim.wait_for_frames(3).await;
        assert_eq!(frames[0], [0x10, 0x00, 0x00, 0x00, 0x32]);
        assert_eq!(frames[1], [0x0A, 0x00, 0x00, 0x07, 0x00]);
        assert_eq!(frames[2], [0x11, 0x00, 0x00, 0x00, 0x03]);
    }

    #[tokio::test]
    async fn test_failed_send_writes_no_journal() {
        let (driver, _) = connected_pump().await;
        driver.base().disconnect().await;
        assert!(!driver.is_connected());

        let err = driver.start_rotation(5, Direction::Left).await.unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
        let err = driver.set_rotation_speed(9).await.unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));

        assert_eq!(driver.stored_speed(), 0);
        assert!(driver.history().get_states(None).is_empty());
        assert!(driver.history().get_events(None).is_empty());
    }
}
