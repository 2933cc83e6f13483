//! Client for the sidecar resolution protocol.
//!
//! Every call opens a fresh connection to the sidecar, sends one request
//! line, reads one reply line, and drops the connection. No channel or
//! result is cached between calls.

use std::io;
use std::time::Duration;

use conduit_config::SidecarRoot;
use conduit_protocol::{
    CodecError, ErrorCode, ErrorReply, Reply, Request, ResolvedTarget, TargetError, read_message,
    write_message,
};
use tracing::debug;

use crate::deadline::Deadline;
use crate::errors::ResolveError;
use crate::transport::{Connection, connect_endpoint};

const RESOLVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resolver");

/// Issues `Listen` and `Open` requests against one sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverClient {
    root: SidecarRoot,
}

impl ResolverClient {
    /// Builds a client for the sidecar at `root`.
    #[must_use]
    pub const fn new(root: SidecarRoot) -> Self {
        Self { root }
    }

    /// Sidecar root this client talks to.
    #[must_use]
    pub const fn root(&self) -> &SidecarRoot {
        &self.root
    }

    /// Registers `service_addr` and returns the address to bind.
    ///
    /// # Errors
    ///
    /// See [`ResolverClient::listen_within`].
    pub fn listen(&self, service_addr: &str) -> Result<String, ResolveError> {
        self.listen_within(service_addr, Deadline::unbounded())
    }

    /// Registers `service_addr` within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::AuthorityUnreachable`] when the sidecar cannot
    /// be contacted and [`ResolveError::RegistrationRejected`] when it
    /// declines the address.
    pub fn listen_within(
        &self,
        service_addr: &str,
        deadline: Deadline,
    ) -> Result<String, ResolveError> {
        let request = Request::listen(service_addr);
        match self.exchange(&request, deadline)? {
            Reply::Listen(reply) if reply.listen_addr.trim().is_empty() => {
                Err(ResolveError::EmptyAddress {
                    logical: service_addr.to_owned(),
                })
            }
            Reply::Listen(reply) => Ok(reply.listen_addr),
            Reply::Error(reply) => Err(self.declined(&request, service_addr, reply)),
            other => Err(self.unexpected(&request, &other)),
        }
    }

    /// Resolves `dst_addr` into a connect target.
    ///
    /// # Errors
    ///
    /// See [`ResolverClient::open_within`].
    pub fn open(&self, dst_addr: &str) -> Result<ResolvedTarget, ResolveError> {
        self.open_within(dst_addr, Deadline::unbounded())
    }

    /// Resolves `dst_addr` within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::AuthorityUnreachable`] when the sidecar cannot
    /// be contacted, [`ResolveError::UnresolvedDestination`] when it has no
    /// mapping, and [`ResolveError::UnknownAddressFamily`] when the reply
    /// names a family this client does not support.
    pub fn open_within(
        &self,
        dst_addr: &str,
        deadline: Deadline,
    ) -> Result<ResolvedTarget, ResolveError> {
        let request = Request::open(dst_addr);
        match self.exchange(&request, deadline)? {
            Reply::Open(reply) => reply.into_target().map_err(|error| match error {
                TargetError::UnknownFamily { family } => ResolveError::UnknownAddressFamily {
                    dst_addr: dst_addr.to_owned(),
                    family,
                },
                TargetError::MissingFamily(raw) => ResolveError::UnknownAddressFamily {
                    dst_addr: dst_addr.to_owned(),
                    family: raw,
                },
                TargetError::EmptyAddress { .. } => ResolveError::EmptyAddress {
                    logical: dst_addr.to_owned(),
                },
            }),
            Reply::Error(reply) => Err(self.declined(&request, dst_addr, reply)),
            other => Err(self.unexpected(&request, &other)),
        }
    }

    fn exchange(&self, request: &Request, deadline: Deadline) -> Result<Reply, ResolveError> {
        let root = self.root.to_string();
        debug!(
            target: RESOLVER_TARGET,
            root = %root,
            operation = request.operation(),
            "contacting sidecar"
        );
        if deadline.is_expired() {
            return Err(ResolveError::TimedOut { root });
        }

        let mut connection = connect_endpoint(self.root.endpoint(), deadline).map_err(|source| {
            if source.kind() == io::ErrorKind::TimedOut && deadline.is_expired() {
                ResolveError::TimedOut { root: root.clone() }
            } else {
                ResolveError::AuthorityUnreachable {
                    root: root.clone(),
                    source,
                }
            }
        })?;
        let budget = deadline
            .budget()
            .map_err(|_| ResolveError::TimedOut { root: root.clone() })?;
        bound_io(&connection, budget, &root)?;

        write_message(&mut connection, request)
            .map_err(|error| codec_failure(&root, deadline, error))?;
        let reply: Option<Reply> = read_message(&mut connection)
            .map_err(|error| codec_failure(&root, deadline, error))?;
        reply.ok_or_else(|| ResolveError::Exchange {
            root,
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "sidecar closed the connection without replying",
            ),
        })
    }

    fn declined(&self, request: &Request, logical: &str, reply: ErrorReply) -> ResolveError {
        debug!(
            target: RESOLVER_TARGET,
            root = %self.root,
            operation = request.operation(),
            logical,
            code = ?reply.code,
            "sidecar declined request"
        );
        match (request, reply.code) {
            (Request::Listen(_), ErrorCode::RegistrationRejected) => {
                ResolveError::RegistrationRejected {
                    service_addr: logical.to_owned(),
                    message: reply.message,
                }
            }
            (Request::Open(_), ErrorCode::UnresolvedDestination) => {
                ResolveError::UnresolvedDestination {
                    dst_addr: logical.to_owned(),
                    message: reply.message,
                }
            }
            (_, code) => ResolveError::Sidecar {
                operation: request.operation(),
                code,
                message: reply.message,
            },
        }
    }

    fn unexpected(&self, request: &Request, reply: &Reply) -> ResolveError {
        ResolveError::UnexpectedReply {
            root: self.root.to_string(),
            expected: request.operation(),
            actual: reply.kind(),
        }
    }
}

/// Registers `service_addr` with the sidecar at `root`.
///
/// # Errors
///
/// See [`ResolverClient::listen`].
pub fn resolve_listen(root: &SidecarRoot, service_addr: &str) -> Result<String, ResolveError> {
    ResolverClient::new(root.clone()).listen(service_addr)
}

/// Resolves `dst_addr` through the sidecar at `root`.
///
/// # Errors
///
/// See [`ResolverClient::open`].
pub fn resolve_open(root: &SidecarRoot, dst_addr: &str) -> Result<ResolvedTarget, ResolveError> {
    ResolverClient::new(root.clone()).open(dst_addr)
}

fn bound_io(
    connection: &Connection,
    budget: Option<Duration>,
    root: &str,
) -> Result<(), ResolveError> {
    connection
        .set_read_timeout(budget)
        .and_then(|()| connection.set_write_timeout(budget))
        .map_err(|source| ResolveError::Exchange {
            root: root.to_owned(),
            source,
        })
}

/// Socket timeouts surface as `WouldBlock` on Unix and `TimedOut` elsewhere.
fn is_socket_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn codec_failure(root: &str, deadline: Deadline, error: CodecError) -> ResolveError {
    match error {
        CodecError::Write(source) | CodecError::Read(source)
            if deadline.remaining().is_some() && is_socket_timeout(&source) =>
        {
            ResolveError::TimedOut {
                root: root.to_owned(),
            }
        }
        CodecError::Write(source) | CodecError::Read(source) => ResolveError::Exchange {
            root: root.to_owned(),
            source,
        },
        other => ResolveError::MalformedReply {
            root: root.to_owned(),
            source: other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::SocketEndpoint;
    use conduit_protocol::AddressFamily;
    use std::io::Write;
    use std::net::TcpListener;
    use crate::transport::connect_tcp;
    use std::thread;
    use std::time::Instant;

    /// Serves one connection with a canned reply line.
    fn one_shot_sidecar(reply: &'static str) -> (SidecarRoot, thread::JoinHandle<String>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind sidecar");
        let port = listener.local_addr().expect("sidecar address").port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = conduit_protocol::codec::read_line(&mut stream)
                .expect("read request")
                .unwrap_or_default();
            stream.write_all(reply.as_bytes()).expect("write reply");
            String::from_utf8(request).expect("utf8 request")
        });
        (
            SidecarRoot::new(SocketEndpoint::tcp("127.0.0.1", port)),
            handle,
        )
    }

    #[test]
    fn open_returns_validated_target() {
        let (root, sidecar) = one_shot_sidecar(
            "{\"kind\":\"open\",\"addr_type\":\"tcp\",\"send_addr\":\"10.0.0.9:80\"}\n",
        );
        let target = ResolverClient::new(root).open("svcA").expect("open");
        assert_eq!(target.family(), AddressFamily::Tcp);
        assert_eq!(target.address(), "10.0.0.9:80");
        let request = sidecar.join().expect("join sidecar");
        assert!(request.contains("\"dst_addr\":\"svcA\""));
    }

    #[test]
    fn listen_returns_bind_address() {
        let (root, sidecar) =
            one_shot_sidecar("{\"kind\":\"listen\",\"listen_addr\":\"0.0.0.0:7100\"}\n");
        let address = resolve_listen(&root, "svcA").expect("listen");
        assert_eq!(address, "0.0.0.0:7100");
        sidecar.join().expect("join sidecar");
    }

    #[test]
    fn unknown_family_is_reported_verbatim() {
        let (root, sidecar) =
            one_shot_sidecar("{\"kind\":\"open\",\"addr_type\":\"vsock\",\"send_addr\":\"3:1\"}\n");
        let error = resolve_open(&root, "svcA").expect_err("vsock");
        assert!(matches!(
            error,
            ResolveError::UnknownAddressFamily { ref family, .. } if family == "vsock"
        ));
        sidecar.join().expect("join sidecar");
    }

    #[test]
    fn rejected_registration_is_classified() {
        let (root, sidecar) = one_shot_sidecar(
            "{\"kind\":\"error\",\"code\":\"registration_rejected\",\"message\":\"taken\"}\n",
        );
        let error = resolve_listen(&root, "svcA").expect_err("rejected");
        assert!(matches!(error, ResolveError::RegistrationRejected { .. }));
        assert!(!error.is_retryable());
        sidecar.join().expect("join sidecar");
    }

    #[test]
    fn mismatched_reply_kind_is_a_protocol_error() {
        let (root, sidecar) = one_shot_sidecar("{\"kind\":\"listen\",\"listen_addr\":\"x\"}\n");
        let error = resolve_open(&root, "svcA").expect_err("wrong kind");
        assert!(matches!(
            error,
            ResolveError::UnexpectedReply {
                expected: "open",
                actual: "listen",
                ..
            }
        ));
        sidecar.join().expect("join sidecar");
    }

    #[test]
    fn garbage_reply_is_malformed() {
        let (root, sidecar) = one_shot_sidecar("not json\n");
        let error = resolve_open(&root, "svcA").expect_err("garbage");
        assert!(matches!(error, ResolveError::MalformedReply { .. }));
        sidecar.join().expect("join sidecar");
    }

    #[test]
    fn refused_connection_is_unreachable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("address").port();
        drop(listener);
        let root = SidecarRoot::new(SocketEndpoint::tcp("127.0.0.1", port));
        let error = ResolverClient::new(root)
            .open_within("svcA", Deadline::after(Duration::from_secs(2)))
            .expect_err("nothing listens");
        assert!(matches!(error, ResolveError::AuthorityUnreachable { .. }));
        assert!(error.is_retryable());
    }

    #[test]
    fn expired_budget_never_contacts_sidecar() {
        let root = SidecarRoot::new(SocketEndpoint::tcp("127.0.0.1", 9));
        let error = ResolverClient::new(root)
            .open_within("svcA", Deadline::after(Duration::ZERO))
            .expect_err("budget spent");
        assert!(matches!(error, ResolveError::TimedOut { .. }));
    }

    #[test]
    fn silent_sidecar_exhausts_the_budget_as_a_timeout() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind sidecar");
        let port = listener.local_addr().expect("sidecar address").port();
        let holder = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            thread::sleep(Duration::from_secs(1));
            drop(stream);
        });
        let root = SidecarRoot::new(SocketEndpoint::tcp("127.0.0.1", port));

        let started = Instant::now();
        let error = ResolverClient::new(root)
            .open_within("svcA", Deadline::after(Duration::from_millis(300)))
            .expect_err("sidecar never replies");
        assert!(matches!(error, ResolveError::TimedOut { .. }), "{error:?}");
        assert!(started.elapsed() < Duration::from_secs(1));
        holder.join().expect("join sidecar");
    }

    #[test]
    fn socket_option_failure_is_not_a_timeout() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let address = listener.local_addr().expect("address");
        let connection = connect_tcp(address, Deadline::unbounded()).expect("connect");
        let error = bound_io(&connection, Some(Duration::ZERO), "tcp://127.0.0.1:1")
            .expect_err("zero timeouts are rejected");
        let ResolveError::Exchange { source, .. } = error else {
            panic!("expected exchange error, got {error:?}");
        };
        assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
    }
}
