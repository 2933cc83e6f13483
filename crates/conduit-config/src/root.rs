//! Locates the sidecar control endpoint.
//!
//! The root is resolved once by the process entry point and then handed to
//! every component that talks to the sidecar. An explicit override in the
//! environment wins; otherwise the well-known directory must exist. There is
//! no silent fallback when an override is present but unusable.

use std::ffi::OsString;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::defaults::{CONTROL_SOCKET_NAME, ROOT_ENV_VAR, well_known_root_dir};
use crate::socket::{SocketEndpoint, SocketParseError};

/// Location of the sidecar control socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SidecarRoot {
    endpoint: SocketEndpoint,
}

impl SidecarRoot {
    /// Wraps an already known control endpoint.
    #[must_use]
    pub const fn new(endpoint: SocketEndpoint) -> Self {
        Self { endpoint }
    }

    /// Uses `<directory>/controller` as the control socket.
    ///
    /// # Errors
    ///
    /// Fails when the directory is missing or is not a directory.
    pub fn from_directory(directory: &Utf8Path) -> Result<Self, RootDiscoveryError> {
        let metadata = std::fs::metadata(directory.as_std_path()).map_err(|source| {
            RootDiscoveryError::Inaccessible {
                path: directory.to_path_buf(),
                source,
            }
        })?;
        if !metadata.is_dir() {
            return Err(RootDiscoveryError::NotADirectory {
                path: directory.to_path_buf(),
            });
        }
        Ok(Self::new(SocketEndpoint::unix(
            directory.join(CONTROL_SOCKET_NAME),
        )))
    }

    /// Discovers the root from the process environment and the well-known
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`RootDiscoveryError`] when neither source yields a usable
    /// location.
    pub fn discover() -> Result<Self, RootDiscoveryError> {
        Self::discover_with(|key| std::env::var_os(key), &well_known_root_dir())
    }

    /// Discovers the root using a caller-supplied environment lookup.
    ///
    /// # Errors
    ///
    /// Returns [`RootDiscoveryError`] when the override is malformed or when
    /// no override is set and `well_known` is unusable.
    pub fn discover_with<F>(lookup: F, well_known: &Utf8Path) -> Result<Self, RootDiscoveryError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        match lookup(ROOT_ENV_VAR).filter(|value| !value.is_empty()) {
            Some(value) => Self::from_override(value),
            None => Self::from_directory(well_known).map_err(|error| match error {
                RootDiscoveryError::Inaccessible { path, source }
                    if source.kind() == io::ErrorKind::NotFound =>
                {
                    RootDiscoveryError::NotFound { well_known: path }
                }
                other => other,
            }),
        }
    }

    fn from_override(value: OsString) -> Result<Self, RootDiscoveryError> {
        let text = value
            .into_string()
            .map_err(|raw| RootDiscoveryError::NonUtf8Override { value: raw })?;
        if text.contains("://") {
            return text
                .parse::<SocketEndpoint>()
                .map(Self::new)
                .map_err(|source| RootDiscoveryError::InvalidOverride {
                    value: text,
                    source,
                });
        }
        Self::from_directory(&Utf8PathBuf::from(text))
    }

    /// Control endpoint of the sidecar.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }
}

impl From<SocketEndpoint> for SidecarRoot {
    fn from(endpoint: SocketEndpoint) -> Self {
        Self::new(endpoint)
    }
}

impl fmt::Display for SidecarRoot {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.endpoint.fmt(formatter)
    }
}

/// Errors raised while locating the sidecar.
#[derive(Debug, Error)]
pub enum RootDiscoveryError {
    /// No override was set and the well-known directory does not exist.
    #[error("sidecar root not found: set CONDUIT_SIDECAR_ROOT or create '{well_known}'")]
    NotFound {
        /// Directory that was searched.
        well_known: Utf8PathBuf,
    },
    /// The candidate directory could not be inspected.
    #[error("failed to inspect sidecar root '{path}': {source}")]
    Inaccessible {
        /// Directory that was searched.
        path: Utf8PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
    /// The candidate path exists but is not a directory.
    #[error("sidecar root '{path}' is not a directory")]
    NotADirectory {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// The override looked like an endpoint URL but did not parse.
    #[error("invalid CONDUIT_SIDECAR_ROOT value '{value}': {source}")]
    InvalidOverride {
        /// Raw override value.
        value: String,
        /// Parse failure.
        #[source]
        source: SocketParseError,
    },
    /// The override was not valid UTF-8.
    #[error("CONDUIT_SIDECAR_ROOT is not valid UTF-8: {value:?}")]
    NonUtf8Override {
        /// Raw override value.
        value: OsString,
    },
}
