use thiserror::Error;

/// The primary error type for the `nfckit` library.
#[derive(Error, Debug)]
pub enum NfcError {
    #[error("NFC is not available on this device")]
    NotAvailable,

    #[error("a polling session is already active")]
    SessionAlreadyActive,

    #[error("session is not active")]
    SessionNotActive,

    #[error("no tag polled")]
    NoTagPolled,

    #[error("{0} not supported on the current tag")]
    TechnologyNotSupported(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transceive not supported for this type of tag")]
    TransceiveUnsupported,

    #[error("communication error: {0}")]
    CommunicationError(String),

    #[error("tag was removed from the field")]
    TagRemoved,

    #[error("NDEF format error: {0}")]
    FormatError(String),

    #[error("polling tag timeout")]
    PollingTimeout,

    #[error("tag is not writable")]
    NotWritable,

    #[error("failed to lock NDEF tag")]
    LockFailed,
}

impl From<hex::FromHexError> for NfcError {
    fn from(err: hex::FromHexError) -> Self {
        NfcError::InvalidArgument(format!("malformed hex string: {err}"))
    }
}
