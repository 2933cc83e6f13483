//! Entry point for the development sidecar.
//!
//! Delegates to [`conduit_sidecar::run`], which parses the command line,
//! installs telemetry, and serves the control socket until stopped. Stderr
//! must stay unlocked while serving: listener threads log to it.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    conduit_sidecar::run(std::env::args_os(), &mut io::stderr())
}
