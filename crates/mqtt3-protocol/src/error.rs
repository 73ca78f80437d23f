use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors surfaced by the codec and payload accessors.
///
/// The session layer keys its termination policy off these: `Timeout` keeps
/// the read loop alive, everything else tears the session down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    Eof,

    #[error("read deadline elapsed")]
    Timeout,

    #[error("malformed remaining length")]
    MalformedRemainingLength,

    #[error("IO error: {0}")]
    Io(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

impl ProtocolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout)
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Eof
        } else {
            ProtocolError::Io(err.to_string())
        }
    }
}
