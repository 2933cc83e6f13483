//! Resolve-then-dial client for the conduit sidecar.
//!
//! Callers never dial concrete addresses. [`dial`] assembles a
//! [`DialConfig`] from the process baseline, the caller's [`DialOption`]s,
//! and a [`ResolvingDialer`] bound to the sidecar root. The dialer asks the
//! sidecar to resolve the logical name on every connect and then opens a
//! TCP or Unix stream to whatever it returns.
//!
//! ```no_run
//! use conduit_config::Config;
//! use conduit_dial::{Tracer, dial, with_tracer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let channel = dial("search", config.sidecar_root(), &[with_tracer(Tracer::new("frontend"))])?;
//! println!("connected to {}", channel.target());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use conduit_config::SidecarRoot;

mod channel;
mod config;
mod deadline;
mod dialer;
mod errors;
mod options;
mod resolver;
#[cfg(test)]
mod test_support;
mod transport;

pub use channel::{CallInfo, CallOutcome, Channel, Interceptor, RoundRobin, TracingInterceptor};
pub use config::{DialConfig, DialState, assemble, baseline_fragments};
pub use deadline::Deadline;
pub use dialer::ResolvingDialer;
pub use errors::{ConfigError, DialError, DialStage, RegistryError, ResolveError};
pub use options::{
    Balancing, ConfigureDial, DialFragment, DialOption, FragmentKind, KeepalivePolicy,
    ServiceRegistry, Tracer, TransportSecurity, with_balancer, with_balancer_disabled,
    with_keepalive, with_resolution, with_tracer,
};
pub use resolver::{ResolverClient, resolve_listen, resolve_open};
pub use transport::Connection;

/// Budget for resolution plus connect when the caller gives none.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(20);

/// Dials `name` through the sidecar at `root` with the default timeout.
///
/// # Errors
///
/// See [`dial_with_timeout`].
pub fn dial(
    name: &str,
    root: &SidecarRoot,
    options: &[DialOption],
) -> Result<Channel, DialError> {
    dial_with_timeout(name, root, options, DEFAULT_DIAL_TIMEOUT)
}

/// Dials `name` through the sidecar at `root`.
///
/// `timeout` is shared by the resolution round trip and the socket connect.
///
/// # Errors
///
/// Returns [`DialError::Config`] when an option fails (nothing is dialed),
/// [`DialError::Resolve`] or [`DialError::UnknownAddressFamily`] when
/// resolution fails, and [`DialError::Connect`] with the socket error
/// otherwise.
pub fn dial_with_timeout(
    name: &str,
    root: &SidecarRoot,
    options: &[DialOption],
    timeout: Duration,
) -> Result<Channel, DialError> {
    let config = assemble(name, root, options)?;
    Channel::connect(name, config, timeout)
}
