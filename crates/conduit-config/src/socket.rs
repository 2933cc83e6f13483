//! Control endpoints addressed as `tcp://host:port` or `unix:///path`.

use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use url::Url;

/// Where a sidecar control socket lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketEndpoint {
    /// Unix domain socket at a filesystem path.
    Unix {
        /// Socket file.
        path: Utf8PathBuf,
    },
    /// TCP listener.
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// Port; `0` asks the listener for an ephemeral one.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Unix endpoint at `path`.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// TCP endpoint at `host:port`.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket file path, for Unix endpoints.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path),
            Self::Tcp { .. } => None,
        }
    }

    /// Whether this is a Unix domain socket.
    #[must_use]
    pub const fn is_unix(&self) -> bool {
        matches!(self, Self::Unix { .. })
    }

    /// Creates the directory a Unix socket will be bound in, owner-only on
    /// Unix. TCP endpoints need nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the socket path is a bare file
    /// name or its directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let directory = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .ok_or_else(|| SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            })?;
        create_private_dir(directory).map_err(|source| SocketPreparationError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })
    }
}

fn create_private_dir(directory: &Utf8Path) -> io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
    builder.create(directory)
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        let invalid = |reason| SocketParseError::Invalid {
            input: input.to_owned(),
            reason,
        };
        match (url.scheme(), url.host_str(), url.port()) {
            ("tcp", Some(host), Some(port)) => Ok(Self::tcp(host, port)),
            ("tcp", None, _) => Err(invalid("missing TCP host")),
            ("tcp", Some(_), None) => Err(invalid("missing TCP port")),
            ("unix", _, _) if url.path().is_empty() || url.path() == "/" => {
                Err(invalid("missing Unix socket path"))
            }
            ("unix", _, _) => Ok(Self::unix(url.path())),
            (scheme, _, _) => Err(SocketParseError::UnsupportedScheme(scheme.to_owned())),
        }
    }
}

/// Text that does not describe a [`SocketEndpoint`].
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Only `tcp` and `unix` are understood.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    /// The scheme is known but the address is incomplete.
    #[error("{reason} in '{input}'")]
    Invalid {
        /// Text as given.
        input: String,
        /// What is missing.
        reason: &'static str,
    },
    /// Not a URL at all.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Failure to create the directory for a Unix socket.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path has no directory component.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Socket path as configured.
        path: Utf8PathBuf,
    },
    /// The directory could not be created.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that was attempted.
        path: Utf8PathBuf,
        /// Filesystem failure.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn display_unix_socket() {
        let endpoint = SocketEndpoint::unix(Utf8PathBuf::from("/run/conduit/controller"));
        assert_eq!(endpoint.to_string(), "unix:///run/conduit/controller");
    }

    #[rstest]
    #[case("tcp://127.0.0.1:9000", SocketEndpoint::tcp("127.0.0.1", 9000))]
    #[case("unix:///tmp/sidecar.sock", SocketEndpoint::unix("/tmp/sidecar.sock"))]
    fn parses_supported_schemes(#[case] input: &str, #[case] expected: SocketEndpoint) {
        let endpoint: SocketEndpoint = input.parse().expect("endpoint should parse");
        assert_eq!(endpoint, expected);
    }

    #[rstest]
    #[case("tcp://127.0.0.1", "missing TCP port")]
    #[case("unix://", "missing Unix socket path")]
    fn rejects_incomplete_endpoints(#[case] input: &str, #[case] missing: &str) {
        let error = input.parse::<SocketEndpoint>().expect_err("incomplete");
        assert!(matches!(error, SocketParseError::Invalid { reason, .. } if reason == missing));
    }

    #[test]
    fn rejects_other_schemes() {
        let error = "udp://127.0.0.1:53".parse::<SocketEndpoint>().expect_err("udp");
        assert!(matches!(
            error,
            SocketParseError::UnsupportedScheme(ref scheme) if scheme == "udp"
        ));
    }

    #[test]
    fn prepare_filesystem_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("nested").join("controller");
        let endpoint = SocketEndpoint::unix(socket.to_str().expect("utf8 path"));
        endpoint.prepare_filesystem().expect("prepare socket dir");
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn prepare_filesystem_rejects_bare_file_name() {
        let endpoint = SocketEndpoint::unix("controller");
        let error = endpoint
            .prepare_filesystem()
            .expect_err("bare file names have no parent");
        assert!(matches!(error, SocketPreparationError::MissingParent { .. }));
    }
}
