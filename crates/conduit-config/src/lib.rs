//! Process-wide configuration shared by conduit clients and the sidecar.
//!
//! The configuration is built once by a process entry point and threaded
//! through by reference. Nothing here is stored in globals, so concurrent
//! readers never need synchronisation.

mod defaults;
mod logging;
mod root;
mod socket;

use std::ffi::OsString;

use camino::Utf8Path;
use thiserror::Error;

pub use defaults::{
    CONTROL_SOCKET_NAME, DEFAULT_LOG_FILTER, LOG_FILTER_ENV_VAR, LOG_FORMAT_ENV_VAR, ROOT_ENV_VAR,
    WELL_KNOWN_ROOT_DIR, default_log_filter, default_log_format, well_known_root_dir,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use root::{RootDiscoveryError, SidecarRoot};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    sidecar_root: SidecarRoot,
    log_filter: String,
    log_format: LogFormat,
}

impl Config {
    /// Builds a configuration around an explicit sidecar root with default
    /// logging settings.
    #[must_use]
    pub fn new(sidecar_root: SidecarRoot) -> Self {
        Self {
            sidecar_root,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when the sidecar cannot be located or the log format is invalid.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var_os(key), &well_known_root_dir())
    }

    /// Loads the configuration from a caller-supplied environment lookup.
    ///
    /// # Errors
    ///
    /// Fails when the sidecar cannot be located or the log format is invalid.
    pub fn from_lookup<F>(lookup: F, well_known: &Utf8Path) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let sidecar_root = SidecarRoot::discover_with(&lookup, well_known)?;
        Self::new(sidecar_root).with_logging_from(&lookup)
    }

    /// Applies the log filter and format found through `lookup`, keeping the
    /// current values for unset keys.
    ///
    /// # Errors
    ///
    /// Fails when the log format is not recognised.
    pub fn with_logging_from<F>(mut self, lookup: &F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(filter) = lookup_text(lookup, LOG_FILTER_ENV_VAR) {
            self.log_filter = filter;
        }
        if let Some(format) = lookup_text(lookup, LOG_FORMAT_ENV_VAR) {
            self.log_format = format
                .parse()
                .map_err(|source| ConfigLoadError::LogFormat {
                    value: format.clone(),
                    source,
                })?;
        }
        Ok(self)
    }

    /// Replaces the log filter expression.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Replaces the log output format.
    #[must_use]
    pub const fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Location of the sidecar control socket.
    #[must_use]
    pub const fn sidecar_root(&self) -> &SidecarRoot {
        &self.sidecar_root
    }

    /// Log filter expression for `tracing-subscriber`.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn lookup_text<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<OsString>,
{
    lookup(key)
        .and_then(|value| value.into_string().ok())
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Errors raised while loading [`Config`].
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The sidecar root could not be located.
    #[error(transparent)]
    Root(#[from] RootDiscoveryError),
    /// The log format value was not recognised.
    #[error("invalid log format '{value}': {source}")]
    LogFormat {
        /// Raw value from the environment.
        value: String,
        /// Parse failure.
        #[source]
        source: LogFormatParseError,
    },
}
