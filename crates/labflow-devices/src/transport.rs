/*!
 * Exclusive-access byte transport.
 *
 * A [`Transport`] owns one channel to one named port. The channel itself
 * comes from a [`Connector`], which is the only place that knows how ports
 * are physically opened (a real serial device, or the in-process simulator).
 */
use std::fmt::{self, Debug};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::device::{DeviceError, Result};

/// Default deadline for a send/receive exchange
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// An opened byte channel
#[async_trait]
pub trait Channel: Send {
    /// Write every byte of `data`
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read whatever is available into `buf`, returning the byte count
    ///
    /// Must be cancel-safe: if the future is dropped, no bytes are lost.
    /// Zero means the channel reached end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the channel
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Opens channels to named ports
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Open a channel to `port` at `baud_rate`
    async fn open(&self, port: &str, baud_rate: u32) -> io::Result<Box<dyn Channel>>;

    /// Ports that can be probed when none are given explicitly
    fn available_ports(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A [`Channel`] over any tokio byte stream
pub struct StreamChannel<S> {
    stream: S,
}

impl<S> StreamChannel<S> {
    /// Wrap a stream
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

// Fill `buf` from `*filled` onwards; `*filled` stays accurate if the future is dropped
async fn fill(channel: &mut dyn Channel, buf: &mut [u8], filled: &mut usize) -> io::Result<()> {
    while *filled < buf.len() {
        let read = channel.read(&mut buf[*filled..]).await?;
        if read == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        *filled += read;
    }
    Ok(())
}

/// An open channel plus what it still owes from a timed-out exchange
struct Link {
    channel: Box<dyn Channel>,
    // reply bytes that may still arrive for an abandoned exchange
    owed: usize,
    // how long to wait for them before assuming they were never sent
    owed_deadline: Duration,
}

/// Exclusive-access wrapper around one channel
///
/// A send and its matching read happen under one lock, so concurrent callers
/// never see each other's responses. A reply that arrives after its exchange
/// timed out is discarded by the next exchange instead of being taken as that
/// exchange's answer.
pub struct Transport {
    port: String,
    baud_rate: u32,
    connector: Arc<dyn Connector>,
    link: Mutex<Option<Link>>,
    // mirrors `link.is_some()`; only written with `link` locked
    open: AtomicBool,
}

impl Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.is_open())
            .field("connector", &self.connector)
            .finish()
    }
}

impl Transport {
    /// Create a closed transport for `port`
    pub fn new(port: impl Into<String>, baud_rate: u32, connector: Arc<dyn Connector>) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            connector,
            link: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    /// The port identifier
    pub fn port(&self) -> &str {
        &self.port
    }

    /// The configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Whether a channel is currently held
    ///
    /// Does not wait for an exchange in flight.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open the channel; a no-op if it is already open
    pub async fn open(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }

        let channel = self
            .connector
            .open(&self.port, self.baud_rate)
            .await
            .map_err(|e| {
                DeviceError::Connection(format!("Failed to open {}: {}", self.port, e))
            })?;
        *link = Some(Link {
            channel,
            owed: 0,
            owed_deadline: Duration::ZERO,
        });
        self.open.store(true, Ordering::SeqCst);

        debug!(port = %self.port, baud_rate = self.baud_rate, "Opened transport");
        Ok(())
    }

    /// Close the channel; safe on a closed or never-opened transport
    pub async fn close(&self) {
        let mut guard = self.link.lock().await;
        let link = guard.take();
        self.open.store(false, Ordering::SeqCst);
        drop(guard);

        if let Some(mut link) = link {
            if let Err(e) = link.channel.shutdown().await {
                warn!(port = %self.port, "Error while closing transport: {}", e);
            }
            debug!(port = %self.port, "Closed transport");
        }
    }

    /// Write a frame that expects no response
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or_else(|| self.not_open())?;
        self.settle(link).await?;

        link.channel
            .write_all(data)
            .await
            .map_err(|e| self.io_failure("write", e))?;

        trace!(port = %self.port, frame = ?data, "Sent frame");
        Ok(())
    }

    /// Write a frame, then read exactly `expected_size` bytes within `timeout`
    ///
    /// A timeout aborts only this exchange; the transport stays open.
    pub async fn send_and_receive(
        &self,
        data: &[u8],
        expected_size: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or_else(|| self.not_open())?;
        self.settle(link).await?;

        link.channel
            .write_all(data)
            .await
            .map_err(|e| self.io_failure("write", e))?;
        trace!(port = %self.port, frame = ?data, "Sent frame");

        let mut response = vec![0u8; expected_size];
        let mut filled = 0;
        let outcome =
            tokio::time::timeout(timeout, fill(&mut *link.channel, &mut response, &mut filled))
                .await;
        match outcome {
            Ok(Ok(())) => {
                trace!(port = %self.port, response = ?response, "Received response");
                Ok(response)
            }
            Ok(Err(e)) => Err(self.io_failure("read", e)),
            Err(_) => {
                link.owed = expected_size - filled;
                link.owed_deadline = timeout;
                debug!(port = %self.port, ?timeout, owed = link.owed, "Response deadline elapsed");
                Err(DeviceError::Timeout(format!(
                    "No {}-byte response from {} within {:?}",
                    expected_size, self.port, timeout
                )))
            }
        }
    }

    // Swallow the remainder of a reply abandoned by an earlier timeout
    async fn settle(&self, link: &mut Link) -> Result<()> {
        if link.owed == 0 {
            return Ok(());
        }

        let mut scratch = vec![0u8; link.owed];
        let mut discarded = 0;
        let outcome = tokio::time::timeout(
            link.owed_deadline,
            fill(&mut *link.channel, &mut scratch, &mut discarded),
        )
        .await;
        link.owed = 0;

        match outcome {
            Ok(Ok(())) => {
                debug!(port = %self.port, discarded, "Discarded late response");
                Ok(())
            }
            Ok(Err(e)) => Err(self.io_failure("read", e)),
            Err(_) => {
                debug!(port = %self.port, discarded, "Late response never completed");
                Ok(())
            }
        }
    }

    fn not_open(&self) -> DeviceError {
        DeviceError::Connection(format!("Transport for {} is not open", self.port))
    }

    fn io_failure(&self, operation: &str, err: io::Error) -> DeviceError {
        DeviceError::Connection(format!("Failed to {} on {}: {}", operation, self.port, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{DensitometerProtocol, PumpProtocol};
    use crate::sim::{SimConnector, SimInstrument};
    use tokio_test::{assert_err, assert_ok};

    const SHORT: Duration = Duration::from_millis(50);

    fn pump_transport() -> (Transport, SimInstrument) {
        let pump = SimInstrument::pump();
        let connector = SimConnector::new().with_instrument("/dev/ttyUSB0", pump.clone());
        (Transport::new("/dev/ttyUSB0", 9600, Arc::new(connector)), pump)
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let (transport, _) = pump_transport();
        assert_eq!(transport.port(), "/dev/ttyUSB0");
        assert_eq!(transport.baud_rate(), 9600);
        assert!(!transport.is_open());

        assert_ok!(transport.open().await);
        assert!(transport.is_open());
        assert_ok!(transport.open().await);

        transport.close().await;
        assert!(!transport.is_open());
        transport.close().await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_close_never_opened() {
        let (transport, _) = pump_transport();
        transport.close().await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_open_unknown_port_fails() {
        let transport = Transport::new("/dev/nonexistent", 9600, Arc::new(SimConnector::new()));
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (transport, _) = pump_transport();
        let err = transport.send(&[0x01]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));

        let err = transport
            .send_and_receive(&PumpProtocol::IDENTIFICATION_PROBE, 4, SHORT)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (transport, pump) = pump_transport();
        transport.open().await.unwrap();

        let response = transport
            .send_and_receive(&PumpProtocol::IDENTIFICATION_PROBE, 4, DEFAULT_RESPONSE_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(response, PumpProtocol::IDENTIFICATION_RESPONSE.to_vec());

        transport.send(&[0x0B, 0x6F, 0x00, 0x05, 0x00]).await.unwrap();
        transport.close().await;

        let frames = pump.wait_for_frames(2).await;
        assert_eq!(frames[0], PumpProtocol::IDENTIFICATION_PROBE);
        assert_eq!(frames[1], [0x0B, 0x6F, 0x00, 0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_timeout_leaves_transport_open() {
        let connector = SimConnector::new().with_silent_port("/dev/ttyS0");
        let transport = Transport::new("/dev/ttyS0", 9600, Arc::new(connector));
        transport.open().await.unwrap();

        let err = transport
            .send_and_receive(&PumpProtocol::IDENTIFICATION_PROBE, 4, SHORT)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_partial_response_times_out() {
        let pump = SimInstrument::pump()
            .with_reply(PumpProtocol::IDENTIFICATION_PROBE, vec![0x0A, 0x00]);
        let connector = SimConnector::new().with_instrument("/dev/ttyUSB0", pump);
        let transport = Transport::new("/dev/ttyUSB0", 9600, Arc::new(connector));
        transport.open().await.unwrap();

        let result = transport
            .send_and_receive(&PumpProtocol::IDENTIFICATION_PROBE, 4, SHORT)
            .await;
        assert!(matches!(assert_err!(result), DeviceError::Timeout(_)));
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_by_next_exchange() {
        let densitometer = SimInstrument::densitometer(23.5, 0.42)
            .with_reply_delay(Duration::from_millis(130));
        let connector = SimConnector::new().with_instrument("/dev/ttyUSB1", densitometer);
        let transport = Transport::new("/dev/ttyUSB1", 9600, Arc::new(connector));
        transport.open().await.unwrap();

        let protocol = DensitometerProtocol;
        let result = transport
            .send_and_receive(&protocol.encode_temperature_request(), 4, Duration::from_millis(100))
            .await;
        assert!(matches!(assert_err!(result), DeviceError::Timeout(_)));

        // the temperature reply lands during this exchange and must be skipped
        let response = transport
            .send_and_receive(&protocol.encode_od_request(), 4, Duration::from_secs(1))
            .await
            .unwrap();
        let value = protocol.decode_value(&response).unwrap();
        assert!((value - 0.42).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_late_reply_that_never_arrives() {
        let connector = SimConnector::new().with_silent_port("/dev/ttyS0");
        let transport = Transport::new("/dev/ttyS0", 9600, Arc::new(connector));
        transport.open().await.unwrap();

        assert_err!(transport.send_and_receive(&PumpProtocol::IDENTIFICATION_PROBE, 4, SHORT).await);
        // the owed bytes are given up on after one more deadline
        let started = std::time::Instant::now();
        assert_ok!(transport.send(&[0x0B, 0x6F, 0x00, 0x05, 0x00]).await);
        assert!(started.elapsed() >= SHORT);

        let started = std::time::Instant::now();
        assert_ok!(transport.send(&[0x0B, 0x6F, 0x00, 0x06, 0x00]).await);
        assert!(started.elapsed() < SHORT);
    }

    #[tokio::test]
    async fn test_is_open_during_exchange() {
        let connector = SimConnector::new().with_silent_port("/dev/ttyS0");
        let transport = Arc::new(Transport::new("/dev/ttyS0", 9600, Arc::new(connector)));
        transport.open().await.unwrap();

        let exchange = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .send_and_receive(
                        &PumpProtocol::IDENTIFICATION_PROBE,
                        4,
                        Duration::from_millis(300),
                    )
                    .await
            })
        };
        tokio::time::sleep(SHORT).await;

        assert!(transport.link.try_lock().is_err());
        assert!(transport.is_open());
        assert!(format!("{:?}", transport).contains("open: true"));

        let result = exchange.await.unwrap();
        assert!(matches!(assert_err!(result), DeviceError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_concurrent_exchanges_are_not_interleaved() {
        let densitometer = SimInstrument::densitometer(23.5, 0.42);
        let connector = SimConnector::new().with_instrument("/dev/ttyUSB1", densitometer);
        let transport = Arc::new(Transport::new("/dev/ttyUSB1", 9600, Arc::new(connector)));
        transport.open().await.unwrap();

        let protocol = DensitometerProtocol;
        let mut handles = Vec::new();
        for i in 0..20 {
            let transport = transport.clone();
            let frame = if i % 2 == 0 {
                protocol.encode_temperature_request()
            } else {
                protocol.encode_od_request()
            };
            handles.push(tokio::spawn(async move {
                let response = transport
                    .send_and_receive(&frame, 4, DEFAULT_RESPONSE_TIMEOUT)
                    .await
                    .unwrap();
                (i, response)
            }));
        }

        for handle in handles {
            let (i, response) = handle.await.unwrap();
            let value = protocol.decode_value(&response).unwrap();
            if i % 2 == 0 {
                assert!((value - 23.5).abs() < 1e-9);
            } else {
                assert!((value - 0.42).abs() < 1e-9);
            }
        }
    }
}
