#![allow(dead_code)]

use solax_bridge::error::{Error, Result};
use solax_bridge::solax::link::{self, DeviceLink};
use solax_bridge::solax::port::{Connector, Port};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const UNIT_1: &[u8] = b"1 96342304101107 B 00 000.0 00.00 110.3 60.01 0569 0548 008 53.5 022 093 138.9 041 01496 01445 011 10100110 5 3 100 120 040 06 000 143.1 06\xb3k";
pub const UNIT_2: &[u8] = b"2 96342304101108 B 00 000.0 00.00 110.1 60.00 0600 0600 009 53.4 000 092 120.0 041 01496 01445 011 10100110 5 3 100 120 040 04 005 120.0 04\x1f\x8a";
pub const TERMINATOR: &[u8] = b"0 00000000000000 S 00 000.0 00.00 000.0 00.00 0000 0000 000 00.0 000 000 000.0 000 00000 00000 000 00000000 0 0 000 000 000 00 000 000.0 00\x00\x00";
pub const NAK: &[u8] = b"NAKss";

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fast_timings() -> link::Timings {
    link::Timings {
        probe_settle: Duration::from_millis(1),
        probe_window: Duration::from_millis(100),
        poll_step: Duration::from_millis(1),
        reopen_settle: Duration::from_millis(1),
        query_timeout: Duration::from_millis(500),
    }
}

pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![b'('];
    frame.extend_from_slice(payload);
    frame.push(b'\r');
    frame
}

/// Unit index of a `QPGS<n>34\r` command.
pub fn query_index(command: &[u8]) -> Option<u8> {
    let digits = command.strip_prefix(b"QPGS")?.strip_suffix(b"34\r")?;
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Write(String, Vec<u8>),
}

type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

// Device {{{
#[derive(Clone)]
pub struct Device {
    fail_open: bool,
    buffered_on_open: Vec<Vec<u8>>,
    responder: Responder,
}

impl Device {
    pub fn with_responder<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            fail_open: false,
            buffered_on_open: Vec::new(),
            responder: Arc::new(f),
        }
    }

    /// Never answers anything.
    pub fn silent() -> Self {
        Self::with_responder(|_| Vec::new())
    }

    /// Cannot be opened at all.
    pub fn broken() -> Self {
        Self {
            fail_open: true,
            ..Self::silent()
        }
    }

    /// Answers the probe with something that is not the signature.
    pub fn wrong_protocol() -> Self {
        Self::with_responder(|data| {
            if data == link::PROBE {
                vec![b"OK\r\n".to_vec()]
            } else {
                Vec::new()
            }
        })
    }

    /// Answers the probe and serves `units` (payloads) at positions 1..,
    /// replying NAK past the end of the bank.
    pub fn inverter(units: Vec<&'static [u8]>) -> Self {
        Self::inverter_chunked(units, usize::MAX)
    }

    /// Like [`Device::inverter`] but every reply trickles in `chunk` bytes
    /// at a time.
    pub fn inverter_chunked(units: Vec<&'static [u8]>, chunk: usize) -> Self {
        Self::with_responder(move |data| {
            let reply = if data == link::PROBE {
                frame(NAK)
            } else if let Some(index) = query_index(data) {
                let payload = units.get(usize::from(index) - 1).copied().unwrap_or(NAK);
                frame(payload)
            } else {
                return Vec::new();
            };
            reply.chunks(chunk).map(|c| c.to_vec()).collect()
        })
    }

    /// Answers the probe, then replies to queries from `script` in order,
    /// one entry per query. Once the script runs out it stays silent.
    pub fn scripted(script: Vec<Vec<Vec<u8>>>) -> Self {
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        Self::with_responder(move |data| {
            if data == link::PROBE {
                return vec![frame(NAK)];
            }
            script.lock().unwrap().pop_front().unwrap_or_default()
        })
    }

    /// Bytes sitting in the receive buffer every time the device is opened.
    pub fn with_buffered(mut self, data: &[u8]) -> Self {
        self.buffered_on_open.push(data.to_vec());
        self
    }
} // }}}

// MockConnector {{{
#[derive(Clone, Default)]
pub struct MockConnector {
    devices: Arc<Mutex<HashMap<String, Device>>>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, path: &str, device: Device) -> Self {
        self.devices.lock().unwrap().insert(path.to_string(), device);
        self
    }

    pub fn replace_device(&self, path: &str, device: Device) {
        self.devices.lock().unwrap().insert(path.to_string(), device);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Open(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn writes_to(&self, path: &str) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(p, data) if p == path => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn link(&self, paths: &[&str]) -> DeviceLink<MockConnector> {
        DeviceLink::new(
            self.clone(),
            paths.iter().map(|p| p.to_string()).collect(),
            fast_timings(),
        )
    }
}

impl Connector for MockConnector {
    type Port = MockPort;

    fn open(&self, path: &str) -> Result<MockPort> {
        self.events.lock().unwrap().push(Event::Open(path.to_string()));

        let device = match self.devices.lock().unwrap().get(path) {
            Some(device) if !device.fail_open => device.clone(),
            _ => {
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: no such device", path),
                )))
            }
        };

        Ok(MockPort {
            path: path.to_string(),
            rx: device.buffered_on_open.iter().cloned().collect(),
            responder: device.responder,
            events: self.events.clone(),
        })
    }
} // }}}

// MockPort {{{
pub struct MockPort {
    path: String,
    rx: VecDeque<Vec<u8>>,
    responder: Responder,
    events: Arc<Mutex<Vec<Event>>>,
}

impl Port for MockPort {
    // one chunk becomes visible at a time so replies trickle in
    fn bytes_to_read(&mut self) -> std::io::Result<usize> {
        Ok(self.rx.front().map_or(0, |chunk| chunk.len()))
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(mut chunk) = self.rx.pop_front() else {
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.rx.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Write(self.path.clone(), data.to_vec()));
        self.rx.extend((self.responder)(data));
        Ok(())
    }
} // }}}
