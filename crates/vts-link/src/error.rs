/// Errors reported by the avatar host link.
///
/// Every client operation returns one of these instead of swallowing the
/// failure, so callers can decide whether to retry, surface, or ignore it.
#[derive(Debug, thiserror::Error)]
pub enum VtsError {
    #[error("not connected to the avatar host")]
    NotConnected,
    #[error("not authenticated with the avatar host")]
    NotAuthenticated,
    #[error("connection to the avatar host closed before a response arrived")]
    ConnectionClosed,
    #[error("avatar host rejected authentication: {0}")]
    AuthenticationRejected(String),
    #[error("avatar host returned error {error_id}: {message}")]
    Api { error_id: i64, message: String },
    #[error("avatar host transport failed: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed avatar host frame: {0}")]
    Protocol(#[from] serde_json::Error),
}
