//! In-memory resolution policy.
//!
//! A route maps a logical name to the reply an `Open` receives. `Listen`
//! hands out the address of the route with the same name and records the
//! registration, so a second `Listen` for that name is rejected until the
//! registration is released.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use conduit_protocol::{OpenReply, ResolvedTarget, TargetError};
use thiserror::Error;

/// Thread-safe route table shared by every connection handler.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, OpenReply>>,
    registrations: RwLock<HashSet<String>>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from parsed `--route` specifications.
    #[must_use]
    pub fn from_specs<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = RouteSpec>,
    {
        let table = Self::new();
        for spec in specs {
            table.set_route(spec.name, &spec.target);
        }
        table
    }

    /// Maps `name` to `target`, replacing any previous mapping.
    pub fn set_route(&self, name: impl Into<String>, target: &ResolvedTarget) {
        self.set_raw_route(name, OpenReply::from(target));
    }

    /// Maps `name` to a reply that is sent verbatim, even when its family
    /// is not one the client knows.
    pub fn set_raw_route(&self, name: impl Into<String>, reply: OpenReply) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), reply);
    }

    /// Removes the mapping for `name`, returning it if present.
    pub fn remove_route(&self, name: &str) -> Option<OpenReply> {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Looks up the reply for an `Open` of `dst_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::NoRoute`] when no mapping exists.
    pub fn open(&self, dst_addr: &str) -> Result<OpenReply, RouteError> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dst_addr)
            .cloned()
            .ok_or_else(|| RouteError::NoRoute {
                name: dst_addr.to_owned(),
            })
    }

    /// Registers `service_addr` and returns the address to bind.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::NoRoute`] when the name has no route and
    /// [`RouteError::AlreadyRegistered`] when it is already registered.
    pub fn listen(&self, service_addr: &str) -> Result<String, RouteError> {
        let listen_addr = self.open(service_addr)?.send_addr;
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !registrations.insert(service_addr.to_owned()) {
            return Err(RouteError::AlreadyRegistered {
                name: service_addr.to_owned(),
            });
        }
        Ok(listen_addr)
    }

    /// Releases a `Listen` registration. Returns whether one existed.
    pub fn release(&self, service_addr: &str) -> bool {
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service_addr)
    }

    /// Whether `service_addr` currently holds a registration.
    #[must_use]
    pub fn is_registered(&self, service_addr: &str) -> bool {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(service_addr)
    }
}

/// The route table declined a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No route exists for the name.
    #[error("no route for '{name}'")]
    NoRoute {
        /// Logical name that was looked up.
        name: String,
    },
    /// The name already holds a listen registration.
    #[error("'{name}' is already registered")]
    AlreadyRegistered {
        /// Logical name that was registered.
        name: String,
    },
}

/// A `name=family:address` route given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// Logical name.
    pub name: String,
    /// Target the name resolves to.
    pub target: ResolvedTarget,
}

impl FromStr for RouteSpec {
    type Err = RouteSpecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, target) = input
            .split_once('=')
            .ok_or_else(|| RouteSpecError::MissingSeparator(input.to_owned()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RouteSpecError::EmptyName(input.to_owned()));
        }
        let target = target
            .trim()
            .parse::<ResolvedTarget>()
            .map_err(|source| RouteSpecError::Target {
                name: name.to_owned(),
                source,
            })?;
        Ok(Self {
            name: name.to_owned(),
            target,
        })
    }
}

/// Errors raised while parsing a [`RouteSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteSpecError {
    /// The `=` between name and target was missing.
    #[error("route '{0}' must be written as <name>=<family>:<address>")]
    MissingSeparator(String),
    /// The logical name was blank.
    #[error("route '{0}' has an empty name")]
    EmptyName(String),
    /// The target part was invalid.
    #[error("invalid target for route '{name}': {source}")]
    Target {
        /// Logical name of the route.
        name: String,
        /// Target parse failure.
        #[source]
        source: TargetError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_protocol::AddressFamily;
    use rstest::{fixture, rstest};

    #[fixture]
    fn table() -> RouteTable {
        let table = RouteTable::new();
        let target = ResolvedTarget::new(AddressFamily::Tcp, "127.0.0.1:9999").expect("target");
        table.set_route("svcA", &target);
        table
    }

    #[rstest]
    fn open_returns_the_route(table: RouteTable) {
        let reply = table.open("svcA").expect("route");
        assert_eq!(reply.addr_type, "tcp");
        assert_eq!(reply.send_addr, "127.0.0.1:9999");
    }

    #[rstest]
    fn open_of_unknown_name_fails(table: RouteTable) {
        let error = table.open("svcZ").expect_err("no route");
        assert_eq!(
            error,
            RouteError::NoRoute {
                name: "svcZ".to_owned()
            }
        );
    }

    #[rstest]
    fn routes_can_be_replaced(table: RouteTable) {
        let moved = ResolvedTarget::new(AddressFamily::Unix, "/tmp/svc.sock").expect("target");
        table.set_route("svcA", &moved);
        assert_eq!(table.open("svcA").expect("route").send_addr, "/tmp/svc.sock");
    }

    #[rstest]
    fn removed_routes_stop_resolving(table: RouteTable) {
        assert!(table.remove_route("svcA").is_some());
        assert!(table.open("svcA").is_err());
    }

    #[rstest]
    fn listen_rejects_second_registration(table: RouteTable) {
        assert_eq!(table.listen("svcA").expect("first"), "127.0.0.1:9999");
        assert!(table.is_registered("svcA"));
        let error = table.listen("svcA").expect_err("taken");
        assert!(matches!(error, RouteError::AlreadyRegistered { .. }));
        assert!(table.release("svcA"));
        assert!(table.listen("svcA").is_ok());
    }

    #[rstest]
    fn listen_without_route_is_rejected(table: RouteTable) {
        assert!(matches!(
            table.listen("svcZ"),
            Err(RouteError::NoRoute { .. })
        ));
        assert!(!table.is_registered("svcZ"));
    }

    #[rstest]
    #[case("svcA=tcp:127.0.0.1:9999", "svcA", AddressFamily::Tcp, "127.0.0.1:9999")]
    #[case(" svcB = unix:/tmp/test.sock", "svcB", AddressFamily::Unix, "/tmp/test.sock")]
    fn route_specs_parse(
        #[case] input: &str,
        #[case] name: &str,
        #[case] family: AddressFamily,
        #[case] address: &str,
    ) {
        let spec: RouteSpec = input.parse().expect("route spec");
        assert_eq!(spec.name, name);
        assert_eq!(spec.target.family(), family);
        assert_eq!(spec.target.address(), address);
    }

    #[rstest]
    #[case("svcA")]
    #[case("=tcp:127.0.0.1:1")]
    #[case("svcA=vsock:3")]
    #[case("svcA=tcp:")]
    fn bad_route_specs_are_rejected(#[case] input: &str) {
        assert!(input.parse::<RouteSpec>().is_err());
    }

    #[test]
    fn tables_build_from_specs() {
        let specs = ["a=tcp:127.0.0.1:1", "b=unix:/tmp/b.sock"]
            .into_iter()
            .map(|spec| spec.parse::<RouteSpec>().expect("spec"));
        let table = RouteTable::from_specs(specs);
        assert_eq!(table.open("b").expect("route").addr_type, "unix");
    }
}
