use crate::prelude::*;
use crate::error::Result;

use std::io::{Read, Write};
use std::time::Duration;

/// Byte-oriented serial connection, as much of it as the link needs.
pub trait Port: Send {
    /// Bytes waiting in the receive buffer.
    fn bytes_to_read(&mut self) -> std::io::Result<usize>;

    /// Read whatever is available into `buf`, blocking at most for the
    /// port's read timeout. Returns 0 if nothing arrived in time.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()>;
}

/// Opens ports by device path. Closing happens when the port is dropped.
pub trait Connector: Send {
    type Port: Port;

    fn open(&self, path: &str) -> Result<Self::Port>;
}

// SerialConnector {{{
/// Opens real serial devices with fixed line settings.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    settings: config::Serial,
}

impl SerialConnector {
    pub fn new(settings: config::Serial) -> Self {
        Self { settings }
    }
}

impl Connector for SerialConnector {
    type Port = Box<dyn serialport::SerialPort>;

    fn open(&self, path: &str) -> Result<Self::Port> {
        let settings = &self.settings;
        let port = serialport::new(path, settings.baud_rate())
            .data_bits(settings.data_bits().into())
            .parity(settings.parity().into())
            .stop_bits(settings.stop_bits().into())
            .flow_control(settings.flow_control().into())
            .timeout(Duration::from_millis(settings.read_timeout_ms()))
            .open()?;

        debug!(
            "opened {} at {} baud ({:?}, {:?}, {:?}, {:?})",
            path,
            settings.baud_rate(),
            settings.data_bits(),
            settings.parity(),
            settings.stop_bits(),
            settings.flow_control()
        );

        Ok(port)
    }
}

impl Port for Box<dyn serialport::SerialPort> {
    fn bytes_to_read(&mut self) -> std::io::Result<usize> {
        Ok(serialport::SerialPort::bytes_to_read(self.as_ref())? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match Read::read(self, buf) {
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            other => other,
        }
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        Write::write_all(self, data)?;
        Write::flush(self)
    }
} // }}}

// line settings {{{
impl From<config::DataBits> for serialport::DataBits {
    fn from(bits: config::DataBits) -> Self {
        match bits {
            config::DataBits::Five => Self::Five,
            config::DataBits::Six => Self::Six,
            config::DataBits::Seven => Self::Seven,
            config::DataBits::Eight => Self::Eight,
        }
    }
}

impl From<config::Parity> for serialport::Parity {
    fn from(parity: config::Parity) -> Self {
        match parity {
            config::Parity::None => Self::None,
            config::Parity::Odd => Self::Odd,
            config::Parity::Even => Self::Even,
        }
    }
}

impl From<config::StopBits> for serialport::StopBits {
    fn from(bits: config::StopBits) -> Self {
        match bits {
            config::StopBits::One => Self::One,
            config::StopBits::Two => Self::Two,
        }
    }
}

impl From<config::FlowControl> for serialport::FlowControl {
    fn from(flow: config::FlowControl) -> Self {
        match flow {
            config::FlowControl::None => Self::None,
            config::FlowControl::Software => Self::Software,
            config::FlowControl::Hardware => Self::Hardware,
        }
    }
} // }}}
