use crate::prelude::*;
use crate::error::{Error, Result};
use crate::solax::port::{Connector, Port};

use bytes::BytesMut;
use std::time::{Duration, Instant};

/// Substring a compatible device answers the probe with.
pub const SIGNATURE: &[u8] = b"(NAKss";

/// Bytes written to a candidate device to provoke a reply.
pub const PROBE: &[u8] = b"\n\r";

const COMMAND_PREFIX: &[u8] = b"QPGS";
/// Placeholder checksum the device accepts in place of a real CRC.
const COMMAND_CRC: &[u8] = b"34";
const FRAME_START: u8 = b'(';
const FRAME_END: u8 = b'\r';

const READ_CHUNK: usize = 256;

// Timings {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Wait after the probe write before looking for a reply.
    pub probe_settle: Duration,
    /// How long to sample a candidate for the signature.
    pub probe_window: Duration,
    /// Sleep between samples of the receive buffer.
    pub poll_step: Duration,
    /// Wait between closing and reopening the discovered device.
    pub reopen_settle: Duration,
    /// Bound on one query/response exchange.
    pub query_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            probe_settle: Duration::from_millis(500),
            probe_window: Duration::from_millis(2000),
            poll_step: Duration::from_millis(100),
            reopen_settle: Duration::from_millis(200),
            query_timeout: Duration::from_millis(5000),
        }
    }
}

impl From<&config::Serial> for Timings {
    fn from(serial: &config::Serial) -> Self {
        Self {
            probe_settle: Duration::from_millis(serial.probe_settle_ms()),
            probe_window: Duration::from_millis(serial.probe_window_ms()),
            poll_step: Duration::from_millis(serial.poll_step_ms()),
            reopen_settle: Duration::from_millis(serial.reopen_settle_ms()),
            query_timeout: Duration::from_millis(serial.query_timeout_ms()),
        }
    }
} // }}}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Discovering,
    Connected,
}

enum State<P> {
    Disconnected,
    Discovering,
    Connected { path: String, port: P },
}

/// Owns the serial connection to the inverter bank.
///
/// Any failure while connected drops the port and returns the link to
/// `Disconnected`; the next [`DeviceLink::connect`] rediscovers from scratch.
pub struct DeviceLink<C: Connector> {
    connector: C,
    device_paths: Vec<String>,
    timings: Timings,
    state: State<C::Port>,
}

impl<C: Connector> DeviceLink<C> {
    pub fn new(connector: C, device_paths: Vec<String>, timings: Timings) -> Self {
        Self {
            connector,
            device_paths,
            timings,
            state: State::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        match self.state {
            State::Disconnected => LinkState::Disconnected,
            State::Discovering => LinkState::Discovering,
            State::Connected { .. } => LinkState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn active_path(&self) -> Option<&str> {
        match &self.state {
            State::Connected { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(path) = self.active_path() {
            info!("closing serial device {}", path);
        }
        self.state = State::Disconnected;
    }

    /// Probes every candidate path in order and keeps the first one that
    /// answers with [`SIGNATURE`]. No-op when already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = State::Discovering;

        for path in &self.device_paths {
            info!("Checking device: {}", path);

            match self.probe(path) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("{}: no signature within {:?}", path, self.timings.probe_window);
                    continue;
                }
                Err(e) => {
                    debug!("{}: {}", path, e);
                    continue;
                }
            }

            // reopen so the device starts from clean framing state
            std::thread::sleep(self.timings.reopen_settle);
            match self.connector.open(path) {
                Ok(port) => {
                    info!("Found SOLAX device at: {}", path);
                    self.state = State::Connected {
                        path: path.clone(),
                        port,
                    };
                    return Ok(());
                }
                Err(e) => {
                    warn!("{}: reopen after discovery failed: {}", path, e);
                }
            }
        }

        self.state = State::Disconnected;
        Err(Error::NoDeviceFound {
            candidates: self.device_paths.clone(),
        })
    }

    /// Returns whether the device at `path` answered with the signature.
    /// The port is closed again either way.
    fn probe(&self, path: &str) -> Result<bool> {
        let mut port = self.connector.open(path)?;

        trace!("{}: TX {:?}", path, String::from_utf8_lossy(PROBE));
        port.write_all(PROBE)?;
        std::thread::sleep(self.timings.probe_settle);

        let mut received = BytesMut::new();
        let mut waited = Duration::ZERO;

        while waited < self.timings.probe_window {
            if read_available(&mut port, &mut received)? > 0 {
                trace!("{}: RX {:?}", path, String::from_utf8_lossy(&received));
                if contains(&received, SIGNATURE) {
                    return Ok(true);
                }
            }
            std::thread::sleep(self.timings.poll_step);
            waited += self.timings.poll_step;
        }

        Ok(false)
    }

    /// Asks unit `index` (1-based) for its telemetry and returns the frame
    /// payload, CRC included.
    pub fn query(&mut self, index: u8) -> Result<Vec<u8>> {
        let result = match &mut self.state {
            State::Connected { port, .. } => exchange(port, index, &self.timings),
            _ => return Err(Error::NotConnected),
        };

        if result.is_err() {
            self.disconnect();
        }

        result
    }
}

/// One request/response round, draining included, bounded by
/// `query_timeout`.
fn exchange<P: Port>(port: &mut P, index: u8, timings: &Timings) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timings.query_timeout;
    drain(port, deadline)?;

    let command = command(index);
    trace!("TX {:?}", String::from_utf8_lossy(&command));
    port.write_all(&command)?;

    let mut received = BytesMut::new();

    while Instant::now() < deadline {
        if read_available(port, &mut received)? > 0 {
            if let Some(payload) = extract_frame(&received) {
                trace!("RX {:?}", String::from_utf8_lossy(&received));
                return Ok(payload.to_vec());
            }
        }
        std::thread::sleep(timings.poll_step);
    }

    if received.is_empty() {
        Err(Error::Timeout(timings.query_timeout))
    } else {
        Err(Error::IncompleteResponse(received.to_vec()))
    }
}

/// `QPGS<index><crc>\r`
pub fn command(index: u8) -> Vec<u8> {
    let mut command = Vec::with_capacity(COMMAND_PREFIX.len() + 3 + COMMAND_CRC.len() + 1);
    command.extend_from_slice(COMMAND_PREFIX);
    command.extend_from_slice(index.to_string().as_bytes());
    command.extend_from_slice(COMMAND_CRC);
    command.push(FRAME_END);
    command
}

/// Bytes strictly between the first `(` and the next `\r` after it.
pub fn extract_frame(buf: &[u8]) -> Option<&[u8]> {
    let start = buf.iter().position(|&b| b == FRAME_START)?;
    let len = buf[start + 1..].iter().position(|&b| b == FRAME_END)?;
    Some(&buf[start + 1..start + 1 + len])
}

fn drain<P: Port>(port: &mut P, deadline: Instant) -> Result<()> {
    let mut scratch = BytesMut::new();
    let mut discarded = 0;

    while read_available(port, &mut scratch)? > 0 {
        discarded += scratch.len();
        scratch.clear();
        if Instant::now() >= deadline {
            warn!("device kept sending, gave up draining after {} bytes", discarded);
            break;
        }
    }

    if discarded > 0 {
        debug!("discarded {} stale bytes", discarded);
    }
    Ok(())
}

fn read_available<P: Port>(port: &mut P, buf: &mut BytesMut) -> Result<usize> {
    let available = port.bytes_to_read()?;
    if available == 0 {
        return Ok(0);
    }

    let mut chunk = [0u8; READ_CHUNK];
    let n = port.read(&mut chunk[..available.min(READ_CHUNK)])?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
