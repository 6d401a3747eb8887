/*!
 * Simulated instruments.
 *
 * [`SimConnector`] stands in for a serial bus: every port it knows about is
 * backed by an in-process byte stream with a task on the far end that answers
 * frames the way a pump or densitometer would. Drivers, discovery and the
 * registry run unchanged on top of it.
 */
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::trace;

use crate::protocol::CommandFrame;
use crate::protocols::{DensitometerProtocol, PumpProtocol};
use crate::transport::{Channel, Connector, StreamChannel};

const FRAME_SIZE: usize = 5;
const STREAM_BUFFER: usize = 256;
const WAIT_POLL: Duration = Duration::from_millis(10);
const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Encode a reading the way a densitometer reports it
pub fn encode_reading(value: f64) -> Vec<u8> {
    let hundredths = (value.max(0.0) * 100.0).round() as u32;
    let whole = (hundredths / 100).min(u32::from(u8::MAX)) as u8;
    vec![0x00, 0x00, whole, (hundredths % 100) as u8]
}

/// A scripted instrument: a table of frame -> reply
///
/// Frames without a table entry are accepted silently. Clones share the log
/// of received frames.
#[derive(Debug, Clone, Default)]
pub struct SimInstrument {
    replies: Arc<HashMap<CommandFrame, Vec<u8>>>,
    received: Arc<Mutex<Vec<CommandFrame>>>,
    reply_delay: Duration,
    slow_replies: Arc<HashMap<CommandFrame, Duration>>,
}

impl SimInstrument {
    /// Create an instrument that never replies
    pub fn new() -> Self {
        Self::default()
    }

    /// A pump that answers its identification probe
    pub fn pump() -> Self {
        Self::new().with_reply(
            PumpProtocol::IDENTIFICATION_PROBE,
            PumpProtocol::IDENTIFICATION_RESPONSE.to_vec(),
        )
    }

    /// A densitometer that reports fixed temperature and absorbance readings
    pub fn densitometer(temperature_c: f64, absorbance: f64) -> Self {
        let protocol = DensitometerProtocol;
        Self::new()
            .with_reply(
                DensitometerProtocol::IDENTIFICATION_PROBE,
                DensitometerProtocol::IDENTIFICATION_RESPONSE.to_vec(),
            )
            .with_reply(
                protocol.encode_temperature_request(),
                encode_reading(temperature_c),
            )
            .with_reply(protocol.encode_od_request(), encode_reading(absorbance))
    }

    /// Answer `frame` with `reply`, replacing any earlier entry
    pub fn with_reply(mut self, frame: CommandFrame, reply: Vec<u8>) -> Self {
        Arc::make_mut(&mut self.replies).insert(frame, reply);
        self
    }

    /// Stop answering `frame`
    pub fn without_reply(mut self, frame: CommandFrame) -> Self {
        Arc::make_mut(&mut self.replies).remove(&frame);
        self
    }

    /// Wait this long before every reply
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Wait `delay` before answering `frame`, overriding the common reply delay
    pub fn with_slow_reply(mut self, frame: CommandFrame, delay: Duration) -> Self {
        Arc::make_mut(&mut self.slow_replies).insert(frame, delay);
        self
    }

    /// Frames received so far, in arrival order
    pub fn received(&self) -> Vec<CommandFrame> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` frames have arrived, then return them all
    ///
    /// Gives up after a couple of seconds and returns whatever arrived.
    pub async fn wait_for_frames(&self, count: usize) -> Vec<CommandFrame> {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let frames = self.received();
            if frames.len() >= count || tokio::time::Instant::now() >= deadline {
                return frames;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    fn handle(&self, frame: CommandFrame) -> Option<(Vec<u8>, Duration)> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
        let reply = self.replies.get(&frame)?.clone();
        let delay = self
            .slow_replies
            .get(&frame)
            .copied()
            .unwrap_or(self.reply_delay);
        Some((reply, delay))
    }
}

/// What sits behind a simulated port
#[derive(Debug, Clone)]
pub enum SimPort {
    /// A scripted instrument
    Instrument(SimInstrument),
    /// Opens fine but never answers
    Silent,
    /// Refuses to open
    Busy,
}

/// In-process stand-in for a serial bus
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    ports: BTreeMap<String, SimPort>,
    open_channels: Arc<AtomicUsize>,
}

impl SimConnector {
    /// Create a bus with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an instrument at `port`
    pub fn with_instrument(self, port: impl Into<String>, instrument: SimInstrument) -> Self {
        self.with_port(port, SimPort::Instrument(instrument))
    }

    /// Add a port with nothing listening
    pub fn with_silent_port(self, port: impl Into<String>) -> Self {
        self.with_port(port, SimPort::Silent)
    }

    /// Add a port that cannot be opened
    pub fn with_busy_port(self, port: impl Into<String>) -> Self {
        self.with_port(port, SimPort::Busy)
    }

    /// Add a port
    pub fn with_port(mut self, port: impl Into<String>, sim: SimPort) -> Self {
        self.ports.insert(port.into(), sim);
        self
    }

    /// Number of channels currently open on this bus, across clones
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }

    /// Wait until every channel has been closed
    ///
    /// Returns the number still open if that takes longer than a couple of
    /// seconds.
    pub async fn wait_until_idle(&self) -> usize {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let open = self.open_channels();
            if open == 0 || tokio::time::Instant::now() >= deadline {
                return open;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn open(&self, port: &str, _baud_rate: u32) -> io::Result<Box<dyn Channel>> {
        let sim = match self.ports.get(port) {
            Some(SimPort::Busy) => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{} is busy", port),
                ))
            }
            Some(sim) => sim.clone(),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such port: {}", port),
                ))
            }
        };

        let (near, far) = tokio::io::duplex(STREAM_BUFFER);
        self.open_channels.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve(
            port.to_string(),
            far,
            sim,
            self.open_channels.clone(),
        ));

        Ok(Box::new(StreamChannel::new(near)))
    }

    fn available_ports(&self) -> Vec<String> {
        self.ports.keys().cloned().collect()
    }
}

async fn serve(port: String, mut stream: DuplexStream, sim: SimPort, open: Arc<AtomicUsize>) {
    let mut frame = [0u8; FRAME_SIZE];
    while stream.read_exact(&mut frame).await.is_ok() {
        let reply = match &sim {
            SimPort::Instrument(instrument) => match instrument.handle(frame) {
                Some((reply, delay)) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Some(reply)
                }
                None => None,
            },
            SimPort::Silent | SimPort::Busy => None,
        };

        trace!(%port, ?frame, ?reply, "Simulated exchange");
        if let Some(reply) = reply {
            if stream.write_all(&reply).await.is_err() {
                break;
            }
        }
    }
    open.fetch_sub(1, Ordering::SeqCst);
}
