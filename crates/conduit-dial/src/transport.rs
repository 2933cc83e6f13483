//! Socket establishment for sidecar control endpoints and resolved targets.
//!
//! Both TCP and Unix domain sockets are wrapped in a uniform [`Connection`]
//! so callers stay transport agnostic. Every connect is bounded by the
//! caller's [`Deadline`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use conduit_config::SocketEndpoint;
use conduit_protocol::AddressFamily;
use socket2::{SockRef, TcpKeepalive};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use crate::deadline::Deadline;
use crate::options::KeepalivePolicy;

/// A live byte-stream connection.
#[derive(Debug)]
pub enum Connection {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix domain stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    /// Address family of the underlying socket.
    #[must_use]
    pub const fn family(&self) -> AddressFamily {
        match self {
            Self::Tcp(_) => AddressFamily::Tcp,
            #[cfg(unix)]
            Self::Unix(_) => AddressFamily::Unix,
        }
    }

    /// Sets the read timeout on the socket.
    ///
    /// # Errors
    ///
    /// Propagates the socket error, including for zero durations.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Sets the write timeout on the socket.
    ///
    /// # Errors
    ///
    /// Propagates the socket error, including for zero durations.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_write_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_write_timeout(timeout),
        }
    }

    /// Shuts down both halves of the connection.
    ///
    /// # Errors
    ///
    /// Propagates the socket error.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }

    /// Human-readable description of the peer.
    #[must_use]
    pub fn peer_description(&self) -> String {
        match self {
            Self::Tcp(stream) => stream
                .peer_addr()
                .map_or_else(|_| "tcp:<unknown>".to_owned(), |addr| format!("tcp:{addr}")),
            #[cfg(unix)]
            Self::Unix(stream) => stream
                .peer_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|path| path.display().to_string()))
                .map_or_else(|| "unix:<unnamed>".to_owned(), |path| format!("unix:{path}")),
        }
    }

    /// Applies TCP keepalive timing. Unix sockets are left untouched.
    ///
    /// Probing is enabled only when the policy sets an idle time. On Linux
    /// the policy timeout then becomes `TCP_USER_TIMEOUT`.
    pub(crate) fn apply_keepalive(&self, policy: &KeepalivePolicy) -> io::Result<()> {
        let Self::Tcp(stream) = self else {
            return Ok(());
        };
        let Some(time) = policy.time() else {
            return Ok(());
        };
        let socket = SockRef::from(stream);
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(time))?;
        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        socket.set_tcp_user_timeout(Some(policy.timeout()))?;
        Ok(())
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Connects to a sidecar control endpoint.
pub(crate) fn connect_endpoint(
    endpoint: &SocketEndpoint,
    deadline: Deadline,
) -> io::Result<Connection> {
    match endpoint {
        SocketEndpoint::Tcp { host, port } => connect_tcp((host.as_str(), *port), deadline),
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str(), deadline)
            }

            #[cfg(not(unix))]
            {
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unix sockets are unsupported: {path}"),
                ))
            }
        }
    }
}

/// Connects a TCP stream to the first address `target` resolves to.
pub(crate) fn connect_tcp<A>(target: A, deadline: Deadline) -> io::Result<Connection>
where
    A: ToSocketAddrs,
{
    let address = resolve_tcp_address(target)?;
    let stream = match deadline.budget()? {
        Some(budget) => TcpStream::connect_timeout(&address, budget)?,
        None => TcpStream::connect(address)?,
    };
    Ok(Connection::Tcp(stream))
}

fn resolve_tcp_address<A: ToSocketAddrs>(target: A) -> io::Result<SocketAddr> {
    target
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

/// Connects a Unix domain stream with a bounded connect.
#[cfg(unix)]
pub(crate) fn connect_unix(path: &str, deadline: Deadline) -> io::Result<Connection> {
    let stream = match deadline.budget()? {
        Some(budget) => {
            let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
            let address = SockAddr::unix(path)?;
            socket.connect_timeout(&address, budget)?;
            UnixStream::from(socket)
        }
        None => UnixStream::connect(path)?,
    };
    Ok(Connection::Unix(stream))
}
