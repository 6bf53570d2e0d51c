/// Errors reported by a [`Transport`](crate::transport::Transport).
///
/// These never reach callers of `send`; the connection logs them and
/// publishes `transport_error` events.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The attempt could not be started (bad URL, no runtime, ...).
    #[error("Failed to start connection: {0}")]
    Start(String),

    /// A frame was written while no connection was open.
    #[error("Transport is not connected")]
    NotConnected,
}

/// Invalid client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0}")]
    Inconsistent(String),
}
