//! Assembly of dial options into a connection configuration.
//!
//! The baseline policy is merged first, then caller options in order, then
//! the resolution dialer for the process root. The first failing option
//! aborts assembly; later options are not evaluated.

use std::fmt;
use std::sync::Arc;

use conduit_config::SidecarRoot;
use tracing::debug;

use crate::channel::{Interceptor, RoundRobin};
use crate::dialer::ResolvingDialer;
use crate::errors::{ConfigError, DialError};
use crate::options::{
    ConfigureDial, DialFragment, DialOption, FragmentKind, KeepalivePolicy, TransportSecurity,
    with_resolution,
};

const ASSEMBLY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::assembly");

/// Lifecycle of one dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialState {
    /// Nothing has happened yet.
    Idle,
    /// Options are being applied.
    Assembling,
    /// An option failed.
    Aborted,
    /// Configuration is complete.
    Ready,
    /// The dialer is resolving and connecting.
    Dialing,
    /// A connection is live.
    Connected,
    /// Resolution or connect failed.
    Failed,
}

impl fmt::Display for DialState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Assembling => "assembling",
            Self::Aborted => "aborted",
            Self::Ready => "ready",
            Self::Dialing => "dialing",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        formatter.write_str(label)
    }
}

/// Fully assembled configuration for one channel.
pub struct DialConfig {
    security: TransportSecurity,
    keepalive: KeepalivePolicy,
    interceptors: Vec<Arc<dyn Interceptor>>,
    balancer: Option<RoundRobin>,
    dialer: ResolvingDialer,
    applied: Vec<FragmentKind>,
}

impl DialConfig {
    /// Channel security policy.
    #[must_use]
    pub const fn security(&self) -> TransportSecurity {
        self.security
    }

    /// Effective keepalive policy.
    #[must_use]
    pub const fn keepalive(&self) -> &KeepalivePolicy {
        &self.keepalive
    }

    /// Interceptors in application order.
    #[must_use]
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    /// Balancer, when load balancing is enabled.
    #[must_use]
    pub const fn balancer(&self) -> Option<&RoundRobin> {
        self.balancer.as_ref()
    }

    pub(crate) const fn balancer_mut(&mut self) -> Option<&mut RoundRobin> {
        self.balancer.as_mut()
    }

    /// Dialer invoked whenever the channel needs a socket.
    #[must_use]
    pub const fn dialer(&self) -> &ResolvingDialer {
        &self.dialer
    }

    /// Kinds of every fragment merged, in order.
    #[must_use]
    pub fn fragment_kinds(&self) -> &[FragmentKind] {
        &self.applied
    }
}

#[cfg(test)]
impl DialConfig {
    pub(crate) fn push_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }
}

impl fmt::Debug for DialConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DialConfig")
            .field("security", &self.security)
            .field("keepalive", &self.keepalive)
            .field("interceptors", &self.interceptors.len())
            .field("balancer", &self.balancer)
            .field("dialer", &self.dialer)
            .field("applied", &self.applied)
            .finish()
    }
}

#[derive(Default)]
struct Assembly {
    security: TransportSecurity,
    keepalive: KeepalivePolicy,
    interceptors: Vec<Arc<dyn Interceptor>>,
    balancer: Option<RoundRobin>,
    dialer: Option<ResolvingDialer>,
    applied: Vec<FragmentKind>,
}

impl Assembly {
    fn merge(&mut self, fragment: DialFragment) {
        self.applied.push(fragment.kind());
        match fragment {
            DialFragment::Interceptor(interceptor) => self.interceptors.push(interceptor),
            DialFragment::Balancer(balancer) => self.balancer = Some(balancer),
            DialFragment::Dialer(dialer) => self.dialer = Some(dialer),
            DialFragment::Keepalive(policy) => self.keepalive = policy,
            DialFragment::Security(security) => self.security = security,
            DialFragment::Neutral => {}
        }
    }

    fn finish(self) -> Result<DialConfig, ConfigError> {
        let dialer = self.dialer.ok_or(ConfigError::MissingResolution)?;
        Ok(DialConfig {
            security: self.security,
            keepalive: self.keepalive,
            interceptors: self.interceptors,
            balancer: self.balancer,
            dialer,
            applied: self.applied,
        })
    }
}

/// Process-wide baseline applied before any caller option.
#[must_use]
pub fn baseline_fragments() -> [DialFragment; 2] {
    [
        DialFragment::Security(TransportSecurity::Insecure),
        DialFragment::Keepalive(KeepalivePolicy::baseline()),
    ]
}

/// Assembles the configuration for `name` without dialing.
///
/// # Errors
///
/// Returns [`DialError::Config`] with the first failing option's error.
pub fn assemble(
    name: &str,
    root: &SidecarRoot,
    options: &[DialOption],
) -> Result<DialConfig, DialError> {
    let abort = |source: ConfigError| {
        debug!(
            target: ASSEMBLY_TARGET,
            name,
            error = %source,
            state = %DialState::Aborted,
            "dial assembly aborted"
        );
        DialError::Config {
            name: name.to_owned(),
            source,
        }
    };

    debug!(
        target: ASSEMBLY_TARGET,
        name,
        options = options.len(),
        state = %DialState::Assembling,
        "assembling dial configuration"
    );
    let mut assembly = Assembly::default();
    for fragment in baseline_fragments() {
        assembly.merge(fragment);
    }
    for option in options {
        let fragment = option.configure(name).map_err(abort)?;
        debug!(
            target: ASSEMBLY_TARGET,
            name,
            option = option.label(),
            "applied dial option"
        );
        assembly.merge(fragment);
    }
    let resolution = with_resolution(root.clone()).configure(name).map_err(abort)?;
    assembly.merge(resolution);

    let config = assembly.finish().map_err(abort)?;
    debug!(
        target: ASSEMBLY_TARGET,
        name,
        state = %DialState::Ready,
        "dial configuration ready"
    );
    Ok(config)
}
