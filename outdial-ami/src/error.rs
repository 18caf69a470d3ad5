use thiserror::Error;

/// Errors that can occur on the AMI control channel.
#[derive(Debug, Error)]
pub enum AmiError {
    /// Socket-level I/O failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The connect attempt did not complete within the timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// The server greeting did not identify an AMI endpoint.
    #[error("unexpected greeting: {0:?}")]
    UnexpectedGreeting(String),

    /// The login block was rejected.
    #[error("login rejected: {0:?}")]
    LoginRejected(String),

    /// The peer closed the connection mid-handshake.
    #[error("connection closed during {0}")]
    ClosedDuring(&'static str),

    /// The connection is down and could not be re-established.
    #[error("not connected after {attempts} attempts")]
    NotConnected { attempts: u32 },
}
