use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// An effect addressed an LED the strip does not have.
    #[error("LED index {index} is out of range, the strip has {len} LEDs")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("effect task '{name}' failed: {reason}")]
    EffectTaskFailure { name: String, reason: String },

    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("transport did not finish within the {0:?} shutdown grace period")]
    ShutdownTimeout(Duration),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("write timed out")]
    Timeout,

    #[error("frame has {got} LEDs, the strip has {expected}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("cannot encode frame: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
