//! Accept loop for the sidecar control socket.
//!
//! The listener polls a non-blocking socket so the loop can observe the
//! shutdown flag between accepts. A Unix socket file is owned by the
//! [`SocketListener`] and removed when it is dropped.

use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use conduit_config::SocketEndpoint;
use tracing::{debug, info, warn};

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use camino::Utf8Path;
#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

const IDLE_POLL: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// A bound control socket that has not started accepting yet.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

#[derive(Debug)]
enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Acceptor {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Next pending connection, switched back to blocking mode.
    fn poll(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Tcp(stream)),
            #[cfg(unix)]
            Self::Unix(listener) => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => {
                stream.set_blocking()?;
                Ok(Some(stream))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    /// Binds `endpoint`. A leftover Unix socket file nobody serves is
    /// replaced; one that still accepts connections is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the endpoint cannot be bound.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).map_err(|source| {
                    ListenerError::BindTcp {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                let assigned = listener.local_addr().map_or_else(
                    |_| endpoint.clone(),
                    |addr| SocketEndpoint::tcp(host.clone(), addr.port()),
                );
                Ok(Self {
                    endpoint: assigned,
                    acceptor: Acceptor::Tcp(listener),
                })
            }
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                clear_stale_socket(path)?;
                let listener =
                    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
                        path: path.to_string(),
                        source,
                    })?;
                Ok(Self {
                    endpoint: endpoint.clone(),
                    acceptor: Acceptor::Unix(listener),
                })
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => Err(ListenerError::UnsupportedUnix {
                endpoint: endpoint.to_string(),
            }),
        }
    }

    /// Endpoint actually bound. Port `0` is replaced with the assigned port.
    #[must_use]
    pub const fn local_endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Starts accepting on a background thread. Each accepted connection is
    /// handed to `handler` on a thread of its own.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the socket cannot be made non-blocking
    /// or the accept thread cannot be spawned.
    pub fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.acceptor
            .set_nonblocking()
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let endpoint = self.endpoint.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("conduit-sidecar-accept".to_owned())
            .spawn(move || self.serve(&stop, &handler))
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            endpoint,
            shutdown,
            handle: Some(handle),
        })
    }

    fn serve(self, stop: &AtomicBool, handler: &Arc<dyn ConnectionHandler>) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.endpoint,
            "control socket listener active"
        );
        let mut last_failure = None;
        while !stop.load(Ordering::Acquire) {
            match self.acceptor.poll() {
                Ok(Some(stream)) => {
                    last_failure = None;
                    dispatch(stream, handler);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    if last_failure.replace(error.kind()) != Some(error.kind()) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "control socket accept failed"
                        );
                    }
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        debug!(
            target: LISTENER_TARGET,
            endpoint = %self.endpoint,
            "control socket listener stopped"
        );
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let Some(path) = self.endpoint.unix_path() else {
            return;
        };
        if let Err(error) = std::fs::remove_file(path)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: LISTENER_TARGET,
                error = %error,
                path = %path,
                "failed to remove control socket file"
            );
        }
    }
}

fn dispatch(stream: ConnectionStream, handler: &Arc<dyn ConnectionHandler>) {
    let handler = Arc::clone(handler);
    if let Err(error) = thread::Builder::new()
        .name("conduit-sidecar-conn".to_owned())
        .spawn(move || handler.handle(stream))
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            "dropping connection; handler thread could not start"
        );
    }
}

/// Removes a socket file left by a process that is gone.
#[cfg(unix)]
fn clear_stale_socket(path: &Utf8Path) -> Result<(), ListenerError> {
    let stale = |source: io::Error| ListenerError::StaleSocket {
        path: path.to_string(),
        source,
    };
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(stale(error)),
    };
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::NotASocket {
            path: path.to_string(),
        });
    }
    match UnixStream::connect(path) {
        Ok(_) => Err(ListenerError::SocketInUse {
            path: path.to_string(),
        }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            fs::remove_file(path).map_err(stale)
        }
        Err(error) => Err(stale(error)),
    }
}

/// Handle to the background accept thread. Dropping it stops the loop.
#[derive(Debug)]
pub struct ListenerHandle {
    endpoint: SocketEndpoint,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Endpoint the listener serves.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Asks the accept loop to stop after its current poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Waits for the accept loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the loop panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        self.handle
            .take()
            .map_or(Ok(()), |handle| handle.join().map_err(|_| ListenerError::ThreadPanic))
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
