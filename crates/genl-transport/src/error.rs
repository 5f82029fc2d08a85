use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("transport closed")]
    Closed,
}

/// Failures building or parsing netlink messages and attributes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("invalid length in {what}: {len}")]
    BadLength { what: &'static str, len: usize },
    #[error("attribute {tag} in {schema}: expected {expected}, got {len} bytes")]
    SchemaMismatch {
        schema: &'static str,
        tag: u16,
        expected: &'static str,
        len: usize,
    },
    #[error("attribute {tag} is not valid UTF-8")]
    Utf8 { tag: u16 },
    #[error("message would need {needed} bytes, capacity is {capacity}")]
    Capacity { needed: usize, capacity: usize },
}
