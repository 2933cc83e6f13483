//! Connected channels and the hooks that run around unary calls.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{DialConfig, DialState};
use crate::deadline::Deadline;
use crate::errors::DialError;
use crate::options::Tracer;
use crate::transport::Connection;

const CHANNEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::channel");
const RPC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::rpc");

/// Identifies one unary call.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo<'a> {
    /// Logical destination of the channel.
    pub target: &'a str,
    /// Method being invoked.
    pub method: &'a str,
}

/// Result category of a unary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call returned `Ok`.
    Succeeded,
    /// The call returned `Err`.
    Failed,
}

/// Hooks invoked around every unary call on a [`Channel`].
///
/// Interceptors run in configuration order on start and in reverse order on
/// finish.
pub trait Interceptor: Send + Sync {
    /// Called before the call runs.
    fn on_start(&self, call: &CallInfo<'_>);
    /// Called after the call returns.
    fn on_finish(&self, call: &CallInfo<'_>, outcome: CallOutcome, elapsed: Duration);
}

/// Emits a `tracing` event for each call start and finish.
#[derive(Debug, Clone)]
pub struct TracingInterceptor {
    tracer: Tracer,
}

impl TracingInterceptor {
    /// Builds an interceptor for `tracer`.
    #[must_use]
    pub const fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }
}

impl Interceptor for TracingInterceptor {
    fn on_start(&self, call: &CallInfo<'_>) {
        debug!(
            target: RPC_TARGET,
            service = self.tracer.service(),
            destination = call.target,
            method = call.method,
            "unary call started"
        );
    }

    fn on_finish(&self, call: &CallInfo<'_>, outcome: CallOutcome, elapsed: Duration) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match outcome {
            CallOutcome::Succeeded => info!(
                target: RPC_TARGET,
                service = self.tracer.service(),
                destination = call.target,
                method = call.method,
                elapsed_ms,
                "unary call finished"
            ),
            CallOutcome::Failed => warn!(
                target: RPC_TARGET,
                service = self.tracer.service(),
                destination = call.target,
                method = call.method,
                elapsed_ms,
                "unary call failed"
            ),
        }
    }
}

/// Cycles through a fixed set of logical instance names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRobin {
    instances: Vec<String>,
    next: usize,
}

impl RoundRobin {
    /// Builds a balancer; returns `None` for an empty instance list.
    #[must_use]
    pub fn new(instances: Vec<String>) -> Option<Self> {
        (!instances.is_empty()).then_some(Self { instances, next: 0 })
    }

    /// Instance names in rotation order.
    #[must_use]
    pub fn instances(&self) -> &[String] {
        &self.instances
    }

    /// Returns the next instance and advances the rotation.
    pub fn pick(&mut self) -> Option<&str> {
        let index = self.next.checked_rem(self.instances.len())?;
        self.next = index.wrapping_add(1);
        self.instances.get(index).map(String::as_str)
    }
}

/// A connection produced by [`dial`](crate::dial), together with the
/// configuration that produced it.
pub struct Channel {
    name: String,
    endpoint: String,
    config: DialConfig,
    connection: Connection,
    timeout: Duration,
}

impl Channel {
    pub(crate) fn connect(
        name: &str,
        mut config: DialConfig,
        timeout: Duration,
    ) -> Result<Self, DialError> {
        let (endpoint, connection) = establish(name, &mut config, timeout)?;
        Ok(Self {
            name: name.to_owned(),
            endpoint,
            config,
            connection,
            timeout,
        })
    }

    /// Logical name the channel was dialled with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical name resolved for the current connection. Differs from
    /// [`Channel::name`] when a balancer picked an instance.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.endpoint
    }

    /// Configuration the channel was assembled with.
    #[must_use]
    pub const fn config(&self) -> &DialConfig {
        &self.config
    }

    /// The live connection.
    pub const fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Consumes the channel, returning the live connection.
    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.connection
    }

    /// Drops the current connection and dials again. Resolution runs afresh,
    /// so sidecar policy changes take effect here.
    ///
    /// # Errors
    ///
    /// Returns [`DialError`] when resolution or the connect fails; the old
    /// connection is kept in that case.
    pub fn reconnect(&mut self) -> Result<(), DialError> {
        let (endpoint, connection) = establish(&self.name, &mut self.config, self.timeout)?;
        if let Err(error) = self.connection.shutdown() {
            debug!(
                target: CHANNEL_TARGET,
                name = %self.name,
                error = %error,
                "previous connection already closed"
            );
        }
        self.endpoint = endpoint;
        self.connection = connection;
        Ok(())
    }

    /// Runs `call` on the connection with every configured interceptor
    /// around it.
    ///
    /// # Errors
    ///
    /// Returns whatever `call` returns.
    pub fn invoke<T, E, F>(&mut self, method: &str, call: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
    {
        let info = CallInfo {
            target: &self.name,
            method,
        };
        let interceptors = self.config.interceptors();
        for interceptor in interceptors {
            interceptor.on_start(&info);
        }
        let started = Instant::now();
        let result = call(&mut self.connection);
        let outcome = if result.is_ok() {
            CallOutcome::Succeeded
        } else {
            CallOutcome::Failed
        };
        let elapsed = started.elapsed();
        for interceptor in interceptors.iter().rev() {
            interceptor.on_finish(&info, outcome, elapsed);
        }
        result
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Channel")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

fn establish(
    name: &str,
    config: &mut DialConfig,
    timeout: Duration,
) -> Result<(String, Connection), DialError> {
    let endpoint = config
        .balancer_mut()
        .and_then(RoundRobin::pick)
        .unwrap_or(name)
        .to_owned();
    debug!(
        target: CHANNEL_TARGET,
        name,
        endpoint = %endpoint,
        state = %DialState::Dialing,
        "dialing"
    );
    let connection = match config
        .dialer()
        .dial_within(&endpoint, Deadline::after(timeout))
    {
        Ok(connection) => connection,
        Err(error) => {
            debug!(
                target: CHANNEL_TARGET,
                name,
                error = %error,
                state = %DialState::Failed,
                "dial failed"
            );
            return Err(error);
        }
    };
    connection
        .apply_keepalive(config.keepalive())
        .map_err(|source| DialError::Connect {
            name: name.to_owned(),
            target: connection.peer_description(),
            source,
        })?;
    debug!(
        target: CHANNEL_TARGET,
        name,
        peer = %connection.peer_description(),
        state = %DialState::Connected,
        "channel connected"
    );
    Ok((endpoint, connection))
}
