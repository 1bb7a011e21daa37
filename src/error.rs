//! Error types for the client.
//!
//! Setup errors are returned synchronously to the caller; transport and
//! codec failures are wrapped in their own layered variants so the session
//! controller can log and retry instead of unwinding.

use core::fmt;

/// Errors returned synchronously from the public API.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The session controller is not connected; the operation requires a connection.
    Disconnected,
    /// An attachment table (status/data/command/resource) has no free slot.
    AttachmentFull,
    /// A handle does not refer to a populated slot.
    InvalidHandle,
    /// The API key is not 32 hex characters.
    InvalidApiKey,
    /// The publish queue has no free slot.
    QueueFull,
    /// A name or string field did not fit in its bounded buffer.
    StringTooLong,
    /// Encoding or decoding the line format failed.
    Codec(CodecError),
    /// The transport adapter reported a failure.
    Transport(TransportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Disconnected => write!(f, "not connected"),
            Error::AttachmentFull => write!(f, "attachment table is full"),
            Error::InvalidHandle => write!(f, "invalid attachment handle"),
            Error::InvalidApiKey => write!(f, "API key must be 32 hex characters"),
            Error::QueueFull => write!(f, "publish queue is full"),
            Error::StringTooLong => write!(f, "string exceeds bounded capacity"),
            Error::Codec(e) => write!(f, "codec error: {e}"),
            Error::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<CodecError> for Error {
    fn from(value: CodecError) -> Self {
        Error::Codec(value)
    }
}

impl From<TransportError> for Error {
    fn from(value: TransportError) -> Self {
        Error::Transport(value)
    }
}

/// Failures from the value codec.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The output buffer was too small to hold the encoded value.
    BufferTooSmall,
    /// The inbound payload was not valid JSON for the expected shape.
    Malformed,
    /// A value's tag did not match the type expected by the schema.
    TypeMismatch,
    /// An array value had more elements than its declared dimension.
    DimensionMismatch,
    /// A named field referenced by the directive does not exist in the schema.
    UnknownName,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BufferTooSmall => write!(f, "buffer too small"),
            CodecError::Malformed => write!(f, "malformed payload"),
            CodecError::TypeMismatch => write!(f, "value type mismatch"),
            CodecError::DimensionMismatch => write!(f, "array dimension mismatch"),
            CodecError::UnknownName => write!(f, "unknown name"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Failures surfaced by the MQTT/TCP/TLS/HTTP collaborator traits.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The adapter could not open a connection.
    ConnectFailed,
    /// Reading or writing the connection failed.
    Io,
    /// The broker rejected a subscribe/unsubscribe.
    Rejected,
    /// The remote end closed the link (liveness check failed).
    LinkLost,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectFailed => write!(f, "connect failed"),
            TransportError::Io => write!(f, "i/o error"),
            TransportError::Rejected => write!(f, "rejected by broker"),
            TransportError::LinkLost => write!(f, "link lost"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = core::result::Result<T, Error>;
