//! Error types for ping sessions

use thiserror::Error;

/// Errors surfaced synchronously by a [`Session`](crate::Session)
///
/// Only session creation and host registration can fail in the caller's
/// face. Everything that goes wrong with an individual packet is absorbed
/// by the engine and shows up in [`SessionCounters`](crate::SessionCounters)
/// or in the callback stream instead.
///
/// # Examples
///
/// ```
/// # use pingmux::PingError;
/// fn explain(err: &PingError) {
///     match err {
///         PingError::InsufficientPermissions { required, suggestion } => {
///             eprintln!("Insufficient permissions: {}", required);
///             eprintln!("Try: {}", suggestion);
///         }
///         PingError::ResolutionError(name) => {
///             eprintln!("Could not resolve {}", name);
///         }
///         _ => eprintln!("ping failed: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum PingError {
    /// Raw socket creation was denied
    ///
    /// This error provides structured information about what permissions
    /// are needed and how to obtain them.
    #[error("Insufficient permissions: {required}")]
    InsufficientPermissions {
        /// Description of required permissions (e.g., "root or CAP_NET_RAW")
        required: String,
        /// Suggested remedy (e.g., "Run with sudo")
        suggestion: String,
    },

    /// The ICMP protocol is not available on this system
    #[error("ICMP is not available: {0}")]
    ProtocolUnavailable(String),

    /// Socket creation or registration with the reactor failed for other reasons
    #[error("Failed to create socket: {0}")]
    SocketError(String),

    /// The host name could not be resolved to an IPv4 address
    #[error("Failed to resolve host: {0}")]
    ResolutionError(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The session has already been torn down
    #[error("Session has been shut down")]
    SessionClosed,
}
