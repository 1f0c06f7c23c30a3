use thiserror::Error;

/// Conditions reported by a device collaborator.
///
/// `Xrun` and `Suspended` are transient and handled by the poll loop's
/// recovery step. Everything else ends the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceFault {
    #[error("buffer underrun/overrun")]
    Xrun,

    #[error("stream suspended")]
    Suspended,

    #[error("device not ready, try again")]
    WouldBlock,

    #[error("request rejected by device: {0}")]
    Rejected(String),

    #[error("device error: {0}")]
    Other(String),
}

impl DeviceFault {
    /// Whether the poll loop may recover from this fault without aborting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Xrun | Self::Suspended)
    }
}

/// Errors surfaced to the owner of a transfer session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("device fault: {0}")]
    Device(#[from] DeviceFault),

    #[error("short commit: device accepted {accepted} of {requested} frames")]
    ShortCommit { requested: usize, accepted: usize },

    #[error("callback client error: {0}")]
    Client(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn client<S: Into<String>>(msg: S) -> Self {
        Self::Client(msg.into())
    }

    pub fn exhausted<S: Into<String>>(msg: S) -> Self {
        Self::ResourceExhausted(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
