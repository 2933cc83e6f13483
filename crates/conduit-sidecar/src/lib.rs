//! Development sidecar for the conduit resolution protocol.
//!
//! The sidecar answers `Listen` and `Open` from a static [`RouteTable`]
//! that can be edited while it runs. It exists so clients can be exercised
//! end to end without a real placement engine: the integration tests of
//! `conduit-dial` start one per test with [`Sidecar::spawn`].

mod cli;
mod resolution;
mod routes;
pub mod telemetry;
pub mod transport;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use conduit_config::{
    Config, ConfigLoadError, SidecarRoot, SocketEndpoint, SocketPreparationError,
};
use thiserror::Error;
use tracing::info;

pub use cli::Cli;
pub use resolution::ResolutionHandler;
pub use routes::{RouteError, RouteSpec, RouteSpecError, RouteTable};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{
    ConnectionHandler, ConnectionStream, ListenerError, ListenerHandle, SocketListener,
};

const SIDECAR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::sidecar");

/// A running sidecar serving one control endpoint.
#[derive(Debug)]
pub struct Sidecar {
    routes: Arc<RouteTable>,
    handler: Arc<ResolutionHandler>,
    listener: ListenerHandle,
}

impl Sidecar {
    /// Binds `endpoint` and starts answering requests from `routes`.
    ///
    /// # Errors
    ///
    /// Returns [`SidecarError`] when the socket directory cannot be prepared
    /// or the endpoint cannot be bound.
    pub fn spawn(endpoint: &SocketEndpoint, routes: Arc<RouteTable>) -> Result<Self, SidecarError> {
        endpoint.prepare_filesystem()?;
        let listener = SocketListener::bind(endpoint)?;
        let handler = Arc::new(ResolutionHandler::new(Arc::clone(&routes)));
        let connection_handler: Arc<dyn ConnectionHandler> = handler.clone();
        let listener = listener.start(connection_handler)?;
        info!(
            target: SIDECAR_TARGET,
            endpoint = %listener.endpoint(),
            "sidecar serving"
        );
        Ok(Self {
            routes,
            handler,
            listener,
        })
    }

    /// Endpoint the sidecar serves, with any ephemeral port filled in.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        self.listener.endpoint()
    }

    /// Sidecar root clients should resolve through.
    #[must_use]
    pub fn root(&self) -> SidecarRoot {
        SidecarRoot::new(self.endpoint().clone())
    }

    /// Route table the sidecar answers from.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Number of control connections accepted so far.
    #[must_use]
    pub fn connections_served(&self) -> usize {
        self.handler.connections_served()
    }

    /// Blocks until the accept loop exits.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the loop panicked.
    pub fn wait(self) -> Result<(), ListenerError> {
        self.listener.join()
    }

    /// Stops accepting and waits for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the loop panicked.
    pub fn shutdown(self) -> Result<(), ListenerError> {
        self.listener.shutdown();
        self.listener.join()
    }
}

/// Errors raised while starting or running the sidecar.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The socket directory could not be prepared.
    #[error(transparent)]
    Prepare(#[from] SocketPreparationError),
    /// The control endpoint could not be served.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Runs the sidecar binary: parses `args`, installs telemetry, and serves
/// until the listener stops.
pub fn run<I, E>(args: I, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = write!(stderr, "{}", error.render());
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    match serve(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "conduit-sidecar: {error}");
            ExitCode::FAILURE
        }
    }
}

fn serve(cli: Cli) -> Result<(), SidecarError> {
    let config = load_config(&cli)?;
    telemetry::initialise(&config)?;
    let routes = Arc::new(RouteTable::from_specs(cli.routes));
    let sidecar = Sidecar::spawn(config.sidecar_root().endpoint(), routes)?;
    sidecar.wait()?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, ConfigLoadError> {
    let lookup = |key: &str| std::env::var_os(key);
    let mut config = match &cli.bind {
        Some(endpoint) => {
            Config::new(SidecarRoot::new(endpoint.clone())).with_logging_from(&lookup)?
        }
        None => Config::from_env()?,
    };
    if let Some(filter) = &cli.log_filter {
        config = config.with_log_filter(filter.clone());
    }
    if let Some(format) = cli.log_format {
        config = config.with_log_format(format);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_protocol::{AddressFamily, ResolvedTarget};

    #[test]
    fn explicit_bind_skips_root_discovery() {
        let cli = Cli::try_parse_from([
            "conduit-sidecar",
            "--bind",
            "tcp://127.0.0.1:7300",
            "--log-format",
            "compact",
        ])
        .expect("parse");
        let config = load_config(&cli).expect("config");
        assert_eq!(
            config.sidecar_root().endpoint(),
            &SocketEndpoint::tcp("127.0.0.1", 7300)
        );
        assert_eq!(config.log_format(), conduit_config::LogFormat::Compact);
    }

    #[test]
    fn help_exits_successfully() {
        let mut stderr = Vec::new();
        let code = run(
            [OsString::from("conduit-sidecar"), OsString::from("--help")],
            &mut stderr,
        );
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(!stderr.is_empty());
    }

    #[test]
    fn bad_route_fails_before_serving() {
        let mut stderr = Vec::new();
        let code = run(
            [
                OsString::from("conduit-sidecar"),
                OsString::from("--route"),
                OsString::from("broken"),
            ],
            &mut stderr,
        );
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[test]
    fn spawned_sidecar_reports_its_root() {
        let routes = Arc::new(RouteTable::new());
        let target = ResolvedTarget::new(AddressFamily::Tcp, "127.0.0.1:9").expect("target");
        routes.set_route("svcA", &target);
        let sidecar =
            Sidecar::spawn(&SocketEndpoint::tcp("127.0.0.1", 0), routes).expect("spawn sidecar");
        let SocketEndpoint::Tcp { port, .. } = sidecar.endpoint() else {
            panic!("expected tcp endpoint");
        };
        assert_ne!(*port, 0);
        assert_eq!(sidecar.root().endpoint(), sidecar.endpoint());
        assert!(sidecar.routes().open("svcA").is_ok());
        sidecar.shutdown().expect("shutdown");
    }
}
