//! Turns a logical name into a live connection by asking the sidecar first.

use std::time::Duration;

use conduit_config::SidecarRoot;
use conduit_protocol::{AddressFamily, ResolvedTarget};
use tracing::{debug, error};

use crate::deadline::Deadline;
use crate::errors::{DialError, ResolveError};
use crate::resolver::ResolverClient;
use crate::transport::{self, Connection};

const DIALER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dialer");

/// Resolves through the sidecar on every dial, then opens the socket.
///
/// Nothing is cached: two dials to the same name issue two `Open` requests.
/// Retries are left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvingDialer {
    resolver: ResolverClient,
}

impl ResolvingDialer {
    /// Builds a dialer for the sidecar at `root`.
    #[must_use]
    pub const fn new(root: SidecarRoot) -> Self {
        Self {
            resolver: ResolverClient::new(root),
        }
    }

    /// Resolver used for each dial.
    #[must_use]
    pub const fn resolver(&self) -> &ResolverClient {
        &self.resolver
    }

    /// Dials `name`; `timeout` covers resolution and connect together.
    ///
    /// # Errors
    ///
    /// See [`ResolvingDialer::dial_within`].
    pub fn dial(&self, name: &str, timeout: Duration) -> Result<Connection, DialError> {
        self.dial_within(name, Deadline::after(timeout))
    }

    /// Dials `name` within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::Resolve`] when resolution fails,
    /// [`DialError::UnknownAddressFamily`] when the sidecar names a family
    /// this client does not know (no socket is opened), and
    /// [`DialError::Connect`] carrying the unchanged socket error otherwise.
    pub fn dial_within(&self, name: &str, deadline: Deadline) -> Result<Connection, DialError> {
        let target = self
            .resolver
            .open_within(name, deadline)
            .map_err(|source| resolution_failure(name, source))?;
        debug!(
            target: DIALER_TARGET,
            name,
            family = %target.family(),
            address = target.address(),
            "resolved logical name"
        );
        connect_target(name, &target, deadline)
    }
}

fn resolution_failure(name: &str, source: ResolveError) -> DialError {
    match source {
        ResolveError::UnknownAddressFamily { family, .. } => {
            error!(
                target: DIALER_TARGET,
                name,
                family = %family,
                "sidecar returned an unknown address family; client and sidecar versions disagree"
            );
            DialError::UnknownAddressFamily {
                name: name.to_owned(),
                family,
            }
        }
        other => {
            debug!(
                target: DIALER_TARGET,
                name,
                error = %other,
                "resolution failed"
            );
            DialError::Resolve {
                name: name.to_owned(),
                source: other,
            }
        }
    }
}

fn connect_target(
    name: &str,
    target: &ResolvedTarget,
    deadline: Deadline,
) -> Result<Connection, DialError> {
    let connect_error = |source| DialError::Connect {
        name: name.to_owned(),
        target: target.to_string(),
        source,
    };
    match target.family() {
        AddressFamily::Tcp => {
            transport::connect_tcp(target.address(), deadline).map_err(connect_error)
        }
        AddressFamily::Unix => {
            #[cfg(unix)]
            {
                transport::connect_unix(target.address(), deadline).map_err(connect_error)
            }

            #[cfg(not(unix))]
            {
                Err(DialError::UnsupportedTransport {
                    name: name.to_owned(),
                    target: target.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CapturedLogs, event};
    use conduit_config::SocketEndpoint;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn unreachable_sidecar_fails_resolution_stage() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("address").port();
        drop(listener);
        let dialer = ResolvingDialer::new(SidecarRoot::new(SocketEndpoint::tcp("127.0.0.1", port)));
        let error = dialer
            .dial("svcA", Duration::from_secs(2))
            .expect_err("sidecar is down");
        assert!(matches!(
            error,
            DialError::Resolve {
                source: ResolveError::AuthorityUnreachable { .. },
                ..
            }
        ));
    }

    #[test]
    fn expired_budget_skips_the_socket_connect() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let address = listener.local_addr().expect("address").to_string();
        let target = ResolvedTarget::new(AddressFamily::Tcp, address).expect("target");
        let error = connect_target("svcA", &target, Deadline::after(Duration::ZERO))
            .expect_err("no budget left");
        assert_eq!(
            error.io_error().map(std::io::Error::kind),
            Some(std::io::ErrorKind::TimedOut)
        );
        assert!(listener.accept().is_err(), "no connection attempted");
    }

    #[test]
    fn unknown_family_is_logged_as_an_error() {
        let sidecar = TcpListener::bind(("127.0.0.1", 0)).expect("bind sidecar");
        let port = sidecar.local_addr().expect("sidecar address").port();
        let server = thread::spawn(move || {
            let (mut stream, _) = sidecar.accept().expect("accept");
            conduit_protocol::codec::read_line(&mut stream).expect("read request");
            stream
                .write_all(b"{\"kind\":\"open\",\"addr_type\":\"vsock\",\"send_addr\":\"3:1\"}\n")
                .expect("write reply");
        });
        let dialer = ResolvingDialer::new(SidecarRoot::new(SocketEndpoint::tcp("127.0.0.1", port)));

        let (result, events) =
            CapturedLogs::capture(|| dialer.dial("svcA", Duration::from_secs(2)));
        assert!(matches!(result, Err(DialError::UnknownAddressFamily { .. })));
        let logged = event(
            &events,
            "sidecar returned an unknown address family; client and sidecar versions disagree",
        );
        assert_eq!(logged["level"], "ERROR");
        assert_eq!(logged["target"], DIALER_TARGET);
        assert_eq!(logged["fields"]["name"], "svcA");
        assert_eq!(logged["fields"]["family"], "vsock");
        assert!(
            events.iter().all(|entry| entry["fields"]["message"] != "resolved logical name"),
            "no target was resolved"
        );
        server.join().expect("join sidecar");
    }
}
