use jamlink_protocol::ProtocolError;
use thiserror::Error;

/// Failure taxonomy surfaced through `Failed` status events and tick
/// results. Interval-local conditions (one bad payload, one refused
/// subscription) are reported as notices and never tear the session down.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve or reach {0}")]
    ResolveFailed(String),
    #[error("authentication rejected: {0}")]
    AuthFailed(String),
    #[error("protocol error in {0}")]
    Protocol(&'static str),
    #[error("license rejected")]
    LicenseRejected,
    #[error("license timeout")]
    LicenseTimeout,
    #[error("server connection dropped")]
    NetworkDropped,
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("peer channel capacity exceeded")]
    CapacityExceeded,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] ProtocolError),
}
