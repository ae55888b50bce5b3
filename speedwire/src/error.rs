use speedwire_proto::ProtoError;
use thiserror::Error;

/// Failure of a station or device operation, tagged by kind.
#[derive(Debug, Error)]
pub enum Error {
    /// The device host name or IP did not resolve.
    #[error("failed to resolve device address {0}")]
    InvalidAddress(String),

    /// The multicast socket could not be set up.
    #[error("speedwire socket unavailable")]
    SocketUnavailable(#[source] std::io::Error),

    /// A datagram could not be written.
    #[error("failed to send packet")]
    SendFailed(#[source] std::io::Error),

    /// Bytes handed to the codec did not form a valid envelope.
    #[error("malformed frame")]
    MalformedFrame(#[from] ProtoError),

    /// The peer never answered the identification probe.
    #[error("device does not respond")]
    NoResponse,

    /// The request deadline elapsed.
    #[error("no response within deadline")]
    Timeout,

    /// The device rejected the login.
    #[error("login rejected by device")]
    AuthFailed,

    /// The device answered a request with an error status.
    #[error("request failed with device status {status:#06x}")]
    RequestFailed { status: u16 },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
