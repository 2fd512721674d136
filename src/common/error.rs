use thiserror::Error;

/// Which identifier failed a syntax check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Username,
    ChannelName,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Username => write!(f, "username"),
            Field::ChannelName => write!(f, "channel name"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} check failed for '{value}'")]
pub struct ValidationError {
    pub field: Field,
    pub value: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("server error from {src}: {reason}")]
    Remote { src: String, reason: String },

    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {0} failed: {1}")]
    ConnectFailed(String, String),

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("frame only partially sent")]
    PartiallySent,

    #[error("peer disconnected")]
    Disconnected,

    #[error("frame of {0} bytes exceeds the packet limit")]
    FrameTooLarge(usize),

    #[error("transport error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => TransportError::Disconnected,
            std::io::ErrorKind::WriteZero => TransportError::PartiallySent,
            _ => TransportError::Io(e.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error from {src}: {reason}")]
    Protocol { src: String, reason: String },

    #[error("no response to '{command}' before the deadline")]
    Timeout { command: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("not a member of {0}")]
    NotAMember(String),

    #[error("not connected")]
    Disconnected,
}

impl ClientError {
    /// Timeouts and server-side errors leave the session usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. }
                | ClientError::Protocol { .. }
                | ClientError::Validation(_)
                | ClientError::Decode(_)
                | ClientError::NotAMember(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
