use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no serial device responded with the expected signature (checked {candidates:?})")]
    NoDeviceFound { candidates: Vec<String> },

    #[error("timeout after {0:?}: did not receive data from the serial device")]
    Timeout(Duration),

    #[error("incomplete response from device: {}", String::from_utf8_lossy(.0))]
    IncompleteResponse(Vec<u8>),

    #[error("serial device error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("device link is not connected")]
    NotConnected,

    #[error("malformed telemetry: field {field} cannot be decoded from {token:?}")]
    MalformedTelemetry { field: &'static str, token: String },
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::Transport(err.into())
    }
}

impl Error {
    /// True for failures of the serial link itself, as opposed to bad data
    /// arriving over a healthy link.
    pub fn is_link_error(&self) -> bool {
        !matches!(self, Self::MalformedTelemetry { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
