use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Environment variable that overrides the sidecar root location.
pub const ROOT_ENV_VAR: &str = "CONDUIT_SIDECAR_ROOT";

/// Environment variable holding the log filter expression.
pub const LOG_FILTER_ENV_VAR: &str = "CONDUIT_LOG_FILTER";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV_VAR: &str = "CONDUIT_LOG_FORMAT";

/// Well-known directory searched when no override is present.
pub const WELL_KNOWN_ROOT_DIR: &str = "/run/conduit";

/// File name of the sidecar control socket inside a root directory.
pub const CONTROL_SOCKET_NAME: &str = "controller";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Well-known sidecar root directory as a UTF-8 path.
#[must_use]
pub fn well_known_root_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(WELL_KNOWN_ROOT_DIR)
}
