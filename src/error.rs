use std::convert::Infallible;

use crate::transport::TransportError;

/// Everything that can go wrong while talking to the scope.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Requested channel {requested} while the scope only has channels CH1 to CH{channel_count}")]
    InvalidChannel { requested: String, channel_count: u8 },

    #[error("{setting} is '{value}'. It should be one of {allowed}")]
    InvalidArgument {
        setting: &'static str,
        value: String,
        allowed: &'static str,
    },

    #[error("t0/delta_t and data_start/data_stop are mutually exclusive")]
    ConflictingArguments,

    #[error("Tried to read channel {channel} which is not selected")]
    ChannelNotSelected { channel: String },

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

// Lets `Impedance`/`Coupling` be passed where `TryInto<_>` is expected.
impl From<Infallible> for ScopeError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("reply '{reply}' to '{command}' is not a valid {expected}")]
    Reply {
        command: String,
        reply: String,
        expected: &'static str,
    },

    #[error("malformed block header: {0}")]
    BlockHeader(String),

    #[error("block declares {declared} payload bytes but only {received} arrived")]
    Truncated { declared: usize, received: usize },

    #[error("payload length {0} is not a whole number of 16-bit samples")]
    OddLength(usize),

    #[error("sampling interval {interval} cannot be used to locate samples")]
    Sampling { interval: f64 },
}
