/// Errors surfaced by the socket, its channels and its collaborators.
///
/// `Clone` so a single channel failure can be fanned out to every subscriber
/// attached to the shared stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// The transport reported an error before the connection was established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Private channel authorization was rejected
    #[error("authorization failed for {channel}: {message}")]
    AuthFailure { channel: String, message: String },

    /// The transport failed while the channel was subscribed
    #[error("subscription to {channel} failed: {message}")]
    Subscription { channel: String, message: String },

    /// The token refresh round trip failed
    #[error("token refresh failed ({status}): {message}")]
    Refresh { status: u16, message: String },

    /// Configuration could not be loaded or is invalid
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SocketError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Subscription { .. } => "subscription_failure",
            Self::Refresh { .. } => "refresh_failure",
            Self::Config(_) => "config_error",
        }
    }

    /// The channel this error is scoped to, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::AuthFailure { channel, .. } | Self::Subscription { channel, .. } => {
                Some(channel)
            }
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16()).unwrap_or(0);
        Self::Refresh {
            status,
            message: err.to_string(),
        }
    }
}

impl From<figment::Error> for SocketError {
    fn from(err: figment::Error) -> Self {
        SocketError::Config(err.to_string())
    }
}
