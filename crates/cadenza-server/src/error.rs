//! Server-level error type.

use cadenza_protocol::ProtocolError;

/// Errors that end a session or fail server startup.
///
/// Per-command failures are not errors at this level — they are replied to
/// the client as `ok = false` acknowledgements and the session continues.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A payload violated the wire protocol; the session is killed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Socket-level failure (bind, accept, read, write).
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// A command arrived before the session authenticated.
    #[error("command before authentication")]
    Unauthenticated,

    /// A second `Authenticate` arrived on an authenticated session.
    #[error("duplicate authenticate")]
    AlreadyAuthenticated,

    /// The client never sent its protocol version byte.
    #[error("handshake timed out")]
    HandshakeTimeout,
}
