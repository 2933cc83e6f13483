//! Error taxonomy for resolution, option assembly, and dialing.

use std::io;

use conduit_protocol::{CodecError, ErrorCode};
use thiserror::Error;

/// Failure reported by a [`ServiceRegistry`](crate::ServiceRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RegistryError {
    message: String,
}

impl RegistryError {
    /// Builds a registry error with a diagnostic message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A dial option could not produce its configuration fragment.
///
/// These errors are not retryable: the dependency that backs the option is
/// itself invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The tracer identity was unusable.
    #[error("invalid tracer: {reason}")]
    InvalidTracer {
        /// Why the tracer was rejected.
        reason: String,
    },
    /// The keepalive policy was unusable.
    #[error("invalid keepalive policy: {reason}")]
    InvalidKeepalive {
        /// Why the policy was rejected.
        reason: String,
    },
    /// The service registry failed to list instances.
    #[error("service registry lookup for '{name}' failed: {source}")]
    Registry {
        /// Logical name that was looked up.
        name: String,
        /// Registry failure.
        #[source]
        source: RegistryError,
    },
    /// The service registry knows no instances for the name.
    #[error("service registry has no instances for '{name}'")]
    NoInstances {
        /// Logical name that was looked up.
        name: String,
    },
    /// Assembly finished without a resolution dialer.
    #[error("dial configuration lacks the resolution dialer")]
    MissingResolution,
}

/// Resolution through the sidecar failed.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The sidecar could not be contacted.
    #[error("sidecar at {root} is unreachable: {source}")]
    AuthorityUnreachable {
        /// Sidecar root location.
        root: String,
        /// Connect failure.
        #[source]
        source: io::Error,
    },
    /// The connection to the sidecar failed mid-exchange.
    #[error("exchange with sidecar at {root} failed: {source}")]
    Exchange {
        /// Sidecar root location.
        root: String,
        /// I/O failure while sending or receiving.
        #[source]
        source: io::Error,
    },
    /// The resolution budget ran out before the exchange completed.
    #[error("resolution via sidecar at {root} timed out")]
    TimedOut {
        /// Sidecar root location.
        root: String,
    },
    /// The sidecar reply could not be decoded.
    #[error("malformed reply from sidecar at {root}: {source}")]
    MalformedReply {
        /// Sidecar root location.
        root: String,
        /// Decoding failure.
        #[source]
        source: CodecError,
    },
    /// The sidecar answered with the wrong reply kind.
    #[error("sidecar at {root} sent a '{actual}' reply to a '{expected}' request")]
    UnexpectedReply {
        /// Sidecar root location.
        root: String,
        /// Reply kind that was expected.
        expected: &'static str,
        /// Reply kind that arrived.
        actual: &'static str,
    },
    /// The sidecar declined to register a service address.
    #[error("sidecar rejected registration of '{service_addr}': {message}")]
    RegistrationRejected {
        /// Logical service address.
        service_addr: String,
        /// Sidecar diagnostic.
        message: String,
    },
    /// The sidecar has no mapping for the destination.
    #[error("sidecar has no mapping for '{dst_addr}': {message}")]
    UnresolvedDestination {
        /// Logical destination address.
        dst_addr: String,
        /// Sidecar diagnostic.
        message: String,
    },
    /// The sidecar failed for another reason.
    #[error("sidecar failed the {operation} request ({code:?}): {message}")]
    Sidecar {
        /// Protocol operation.
        operation: &'static str,
        /// Error category sent by the sidecar.
        code: ErrorCode,
        /// Sidecar diagnostic.
        message: String,
    },
    /// The sidecar named an address family this client does not know.
    #[error("sidecar returned unknown address family '{family}' for '{dst_addr}'")]
    UnknownAddressFamily {
        /// Logical destination address.
        dst_addr: String,
        /// Raw family tag.
        family: String,
    },
    /// The sidecar returned an empty address.
    #[error("sidecar returned an empty address for '{logical}'")]
    EmptyAddress {
        /// Logical address that was resolved.
        logical: String,
    },
}

impl ResolveError {
    /// Whether the caller may retry without changing anything.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::AuthorityUnreachable { .. } | Self::Exchange { .. } | Self::TimedOut { .. } => {
                true
            }
            Self::Sidecar { code, .. } => matches!(code, ErrorCode::Internal),
            _ => false,
        }
    }
}

/// Stage of a dial at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStage {
    /// Dial options were being evaluated.
    Assembling,
    /// The logical name was being resolved.
    Resolving,
    /// The resolved socket was being opened.
    Connecting,
}

/// A dial failed. Every variant names the logical destination.
#[derive(Debug, Error)]
pub enum DialError {
    /// A dial option failed; no connection was attempted.
    #[error("config error while dialing '{name}': {source}")]
    Config {
        /// Logical destination.
        name: String,
        /// Option failure.
        #[source]
        source: ConfigError,
    },
    /// Resolution through the sidecar failed.
    #[error("failed to resolve '{name}': {source}")]
    Resolve {
        /// Logical destination.
        name: String,
        /// Resolution failure.
        #[source]
        source: ResolveError,
    },
    /// The sidecar and this client disagree on address families.
    #[error("sidecar returned unknown address family '{family}' for '{name}'")]
    UnknownAddressFamily {
        /// Logical destination.
        name: String,
        /// Raw family tag.
        family: String,
    },
    /// The resolved socket could not be opened.
    #[error("failed to connect to '{name}' at {target}: {source}")]
    Connect {
        /// Logical destination.
        name: String,
        /// Resolved target.
        target: String,
        /// Socket failure, unchanged.
        #[source]
        source: io::Error,
    },
    /// The resolved family is not available on this platform.
    #[error("cannot dial '{name}' at {target}: transport unsupported on this platform")]
    UnsupportedTransport {
        /// Logical destination.
        name: String,
        /// Resolved target.
        target: String,
    },
}

impl DialError {
    /// Stage that failed.
    #[must_use]
    pub const fn stage(&self) -> DialStage {
        match self {
            Self::Config { .. } => DialStage::Assembling,
            Self::Resolve { .. } | Self::UnknownAddressFamily { .. } => DialStage::Resolving,
            Self::Connect { .. } | Self::UnsupportedTransport { .. } => DialStage::Connecting,
        }
    }

    /// Underlying socket error for connect failures.
    #[must_use]
    pub const fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Connect { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether the caller may retry the dial unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Resolve { source, .. } => source.is_retryable(),
            Self::Connect { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::NotFound
            ),
            Self::Config { .. }
            | Self::UnknownAddressFamily { .. }
            | Self::UnsupportedTransport { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn connect_error(kind: io::ErrorKind) -> DialError {
        DialError::Connect {
            name: "svc".to_owned(),
            target: "tcp:127.0.0.1:1".to_owned(),
            source: io::Error::from(kind),
        }
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused, true)]
    #[case(io::ErrorKind::TimedOut, true)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    fn connect_errors_keep_their_kind(#[case] kind: io::ErrorKind, #[case] retryable: bool) {
        let error = connect_error(kind);
        assert_eq!(error.io_error().map(io::Error::kind), Some(kind));
        assert_eq!(error.is_retryable(), retryable);
        assert_eq!(error.stage(), DialStage::Connecting);
    }

    #[test]
    fn unknown_family_is_fatal_and_distinct_from_socket_errors() {
        let error = DialError::UnknownAddressFamily {
            name: "svc".to_owned(),
            family: "vsock".to_owned(),
        };
        assert!(!error.is_retryable());
        assert!(error.io_error().is_none());
        assert_eq!(error.stage(), DialStage::Resolving);
    }

    #[test]
    fn unreachable_sidecar_is_retryable() {
        let error = ResolveError::AuthorityUnreachable {
            root: "unix:///run/conduit/controller".to_owned(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(error.is_retryable());
    }

    #[test]
    fn declined_resolution_is_not_retryable() {
        let error = ResolveError::UnresolvedDestination {
            dst_addr: "svc".to_owned(),
            message: "no route".to_owned(),
        };
        assert!(!error.is_retryable());
    }

    #[test]
    fn messages_name_the_logical_destination() {
        let error = DialError::Config {
            name: "frontend".to_owned(),
            source: ConfigError::NoInstances {
                name: "frontend".to_owned(),
            },
        };
        assert!(error.to_string().contains("'frontend'"));
    }
}
