//! Error types for socket listener operations.

use std::io;

use thiserror::Error;

/// Errors surfaced while binding or running the control socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Binding the TCP listener failed.
    #[error("failed to bind TCP listener at {endpoint}: {source}")]
    BindTcp {
        /// Endpoint the bind was attempted on.
        endpoint: String,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// The listener could not be switched to non-blocking mode.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Socket failure.
        #[source]
        source: io::Error,
    },
    /// Unix sockets are unavailable on this platform.
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix {
        /// Requested endpoint.
        endpoint: String,
    },
    /// Binding the Unix listener failed.
    #[cfg(unix)]
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// Another process is serving the socket.
    #[cfg(unix)]
    #[error("unix socket {path} is already being served")]
    SocketInUse {
        /// Socket path.
        path: String,
    },
    /// The path exists but is not a socket.
    #[cfg(unix)]
    #[error("{path} exists and is not a unix socket")]
    NotASocket {
        /// Offending path.
        path: String,
    },
    /// A leftover socket file could not be inspected or removed.
    #[cfg(unix)]
    #[error("failed to clear stale unix socket {path}: {source}")]
    StaleSocket {
        /// Socket path.
        path: String,
        /// Filesystem or connect check failure.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        /// Spawn failure.
        #[source]
        source: io::Error,
    },
    /// The accept loop panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
