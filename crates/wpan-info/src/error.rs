use genl_transport::{CodecError, TransportError};
use thiserror::Error;

/// Failures opening or driving the control channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("generic netlink family not found: {0}")]
    FamilyNotFound(&'static str),
    #[error("kernel reported receive buffer overrun")]
    Overrun,
}

/// Why a single property query produced no value.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("cannot resolve device {0:?}")]
    Unresolved(String),
    #[error("control channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("kernel returned error {code}")]
    Protocol { code: i32 },
    #[error("no reply before timeout")]
    Timeout,
    #[error("{0} unavailable")]
    Unavailable(&'static str),
    #[error("request or result too large: {0}")]
    Capacity(CodecError),
    #[error("{0} not supported by this backend")]
    Unsupported(&'static str),
}

impl QueryError {
    /// Channel failures and unresolvable devices fail the whole query; the
    /// rest only mean this one property has no value.
    pub fn is_hard(&self) -> bool {
        matches!(self, QueryError::Unresolved(_) | QueryError::Channel(_))
    }
}
