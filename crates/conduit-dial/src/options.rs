//! Composable dial options.
//!
//! Each option turns the logical destination name into one configuration
//! fragment, or fails. Options are plain values: the dependencies they need
//! (a tracer identity, a service registry, a sidecar root) are passed to the
//! factory functions explicitly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conduit_config::SidecarRoot;

use crate::channel::{Interceptor, RoundRobin, TracingInterceptor};
use crate::dialer::ResolvingDialer;
use crate::errors::{ConfigError, RegistryError};

/// Produces a configuration fragment for a logical destination.
pub trait ConfigureDial {
    /// Builds the fragment for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a dependency of the option is invalid.
    fn configure(&self, name: &str) -> Result<DialFragment, ConfigError>;
}

/// Lists the logical instances registered for a service name.
pub trait ServiceRegistry: Send + Sync {
    /// Returns the instance names for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry cannot be queried.
    fn instances(&self, name: &str) -> Result<Vec<String>, RegistryError>;
}

/// Identity under which unary calls are traced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracer {
    service: String,
}

impl Tracer {
    /// Builds a tracer for the calling service.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Name of the calling service.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

/// Client-side load balancing selection.
#[derive(Clone)]
pub enum Balancing {
    /// Balancing is off; the option contributes nothing.
    Disabled,
    /// Round-robin over the instances a registry lists.
    Enabled(Arc<dyn ServiceRegistry>),
}

impl fmt::Debug for Balancing {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => formatter.write_str("Disabled"),
            Self::Enabled(_) => formatter.write_str("Enabled(<registry>)"),
        }
    }
}

/// Keepalive settings for outbound connections.
///
/// Without an idle [`time`](Self::time) no TCP keepalive packets are sent,
/// which is what the baseline policy does. Once a time is set, the
/// [`timeout`](Self::timeout) bounds unacknowledged data on Linux sockets.
/// [`permit_without_stream`](Self::permit_without_stream) is carried for the
/// RPC layer and does not change socket options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepalivePolicy {
    time: Option<Duration>,
    timeout: Duration,
    permit_without_stream: bool,
}

impl KeepalivePolicy {
    /// Acknowledgement timeout applied to every connection.
    pub const BASELINE_TIMEOUT: Duration = Duration::from_secs(120);

    /// Process-wide baseline: no idle keepalive, 120 s timeout, keepalive allowed
    /// without active calls.
    #[must_use]
    pub const fn baseline() -> Self {
        Self {
            time: None,
            timeout: Self::BASELINE_TIMEOUT,
            permit_without_stream: true,
        }
    }

    /// Idle time before the first keepalive packet.
    #[must_use]
    pub const fn with_time(mut self, time: Duration) -> Self {
        self.time = Some(time);
        self
    }

    /// Keepalive acknowledgement timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether keepalives are sent with no call in flight.
    #[must_use]
    pub const fn with_permit_without_stream(mut self, permit: bool) -> Self {
        self.permit_without_stream = permit;
        self
    }

    /// Idle time before keepalive starts, when enabled.
    #[must_use]
    pub const fn time(&self) -> Option<Duration> {
        self.time
    }

    /// Keepalive acknowledgement timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether keepalives are sent with no call in flight.
    #[must_use]
    pub const fn permit_without_stream(&self) -> bool {
        self.permit_without_stream
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidKeepalive {
                reason: "timeout must be non-zero".to_owned(),
            });
        }
        if self.time.is_some_and(|time| time.is_zero()) {
            return Err(ConfigError::InvalidKeepalive {
                reason: "idle time must be non-zero".to_owned(),
            });
        }
        Ok(self)
    }
}

impl Default for KeepalivePolicy {
    fn default() -> Self {
        Self::baseline()
    }
}

/// Channel security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Plaintext transport.
    #[default]
    Insecure,
}

/// One piece of dial configuration.
#[derive(Clone)]
pub enum DialFragment {
    /// Appends a unary-call interceptor.
    Interceptor(Arc<dyn Interceptor>),
    /// Installs a balancer over logical instance names.
    Balancer(RoundRobin),
    /// Installs the dialer invoked whenever a socket is needed.
    Dialer(ResolvingDialer),
    /// Overrides keepalive timing.
    Keepalive(KeepalivePolicy),
    /// Sets the channel security policy.
    Security(TransportSecurity),
    /// Contributes nothing.
    Neutral,
}

impl DialFragment {
    /// Kind of fragment, for inspection.
    #[must_use]
    pub const fn kind(&self) -> FragmentKind {
        match self {
            Self::Interceptor(_) => FragmentKind::Interceptor,
            Self::Balancer(_) => FragmentKind::Balancer,
            Self::Dialer(_) => FragmentKind::Dialer,
            Self::Keepalive(_) => FragmentKind::Keepalive,
            Self::Security(_) => FragmentKind::Security,
            Self::Neutral => FragmentKind::Neutral,
        }
    }
}

impl fmt::Debug for DialFragment {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interceptor(_) => formatter.write_str("Interceptor(..)"),
            Self::Balancer(balancer) => formatter.debug_tuple("Balancer").field(balancer).finish(),
            Self::Dialer(dialer) => formatter.debug_tuple("Dialer").field(dialer).finish(),
            Self::Keepalive(policy) => formatter.debug_tuple("Keepalive").field(policy).finish(),
            Self::Security(security) => {
                formatter.debug_tuple("Security").field(security).finish()
            }
            Self::Neutral => formatter.write_str("Neutral"),
        }
    }
}

/// Discriminant of a [`DialFragment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// See [`DialFragment::Interceptor`].
    Interceptor,
    /// See [`DialFragment::Balancer`].
    Balancer,
    /// See [`DialFragment::Dialer`].
    Dialer,
    /// See [`DialFragment::Keepalive`].
    Keepalive,
    /// See [`DialFragment::Security`].
    Security,
    /// See [`DialFragment::Neutral`].
    Neutral,
}

/// A dial option.
#[derive(Debug, Clone)]
pub enum DialOption {
    /// Traces unary calls under the given identity.
    Tracing(Tracer),
    /// Selects client-side load balancing.
    LoadBalancing(Balancing),
    /// Resolves addresses through the sidecar at the given root.
    Resolution(SidecarRoot),
    /// Overrides keepalive timing.
    Keepalive(KeepalivePolicy),
}

impl DialOption {
    /// Short label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Tracing(_) => "tracing",
            Self::LoadBalancing(_) => "load_balancing",
            Self::Resolution(_) => "resolution",
            Self::Keepalive(_) => "keepalive",
        }
    }
}

impl ConfigureDial for DialOption {
    fn configure(&self, name: &str) -> Result<DialFragment, ConfigError> {
        match self {
            Self::Tracing(tracer) => {
                if tracer.service().trim().is_empty() {
                    return Err(ConfigError::InvalidTracer {
                        reason: "service name is empty".to_owned(),
                    });
                }
                Ok(DialFragment::Interceptor(Arc::new(TracingInterceptor::new(
                    tracer.clone(),
                ))))
            }
            Self::LoadBalancing(Balancing::Disabled) => Ok(DialFragment::Neutral),
            Self::LoadBalancing(Balancing::Enabled(registry)) => {
                let instances = registry
                    .instances(name)
                    .map_err(|source| ConfigError::Registry {
                        name: name.to_owned(),
                        source,
                    })?;
                RoundRobin::new(instances)
                    .map(DialFragment::Balancer)
                    .ok_or_else(|| ConfigError::NoInstances {
                        name: name.to_owned(),
                    })
            }
            Self::Resolution(root) => Ok(DialFragment::Dialer(ResolvingDialer::new(root.clone()))),
            Self::Keepalive(policy) => policy.validate().map(DialFragment::Keepalive),
        }
    }
}

/// Traces every unary call on the channel under `tracer`.
#[must_use]
pub const fn with_tracer(tracer: Tracer) -> DialOption {
    DialOption::Tracing(tracer)
}

/// Enables round-robin balancing over the instances `registry` lists.
#[must_use]
pub fn with_balancer(registry: Arc<dyn ServiceRegistry>) -> DialOption {
    DialOption::LoadBalancing(Balancing::Enabled(registry))
}

/// Balancing option in its disabled form. It stays in the chain as a no-op.
#[must_use]
pub const fn with_balancer_disabled() -> DialOption {
    DialOption::LoadBalancing(Balancing::Disabled)
}

/// Resolves through the sidecar at `root`.
#[must_use]
pub const fn with_resolution(root: SidecarRoot) -> DialOption {
    DialOption::Resolution(root)
}

/// Overrides the keepalive policy.
#[must_use]
pub const fn with_keepalive(policy: KeepalivePolicy) -> DialOption {
    DialOption::Keepalive(policy)
}
