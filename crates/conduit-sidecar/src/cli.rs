//! Command-line interface for the development sidecar.

use clap::Parser;
use conduit_config::{LogFormat, SocketEndpoint};

use crate::routes::RouteSpec;

/// Static-table resolution sidecar for development and tests.
#[derive(Parser, Debug)]
#[command(name = "conduit-sidecar", version)]
pub struct Cli {
    /// Control endpoint to serve, as `tcp://host:port` or `unix:///path`.
    /// Defaults to the discovered sidecar root.
    #[arg(long, value_name = "ENDPOINT")]
    pub bind: Option<SocketEndpoint>,
    /// Route a logical name, for example `search=tcp:127.0.0.1:9000`.
    /// May be repeated.
    #[arg(long = "route", value_name = "NAME=FAMILY:ADDRESS")]
    pub routes: Vec<RouteSpec>,
    /// Log filter expression, overriding the environment.
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,
    /// Log output format (`json` or `compact`), overriding the environment.
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,
}
