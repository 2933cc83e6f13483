//! Address families understood by the transport dialer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Kind of socket a resolved address must be dialled with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AddressFamily {
    /// Stream socket over TCP.
    Tcp,
    /// Stream socket over a local domain socket.
    Unix,
}

/// A concrete connect target produced by a successful `Open`.
///
/// A target is consumed by exactly one connection attempt; callers resolve
/// again for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedTarget {
    family: AddressFamily,
    address: String,
}

impl ResolvedTarget {
    /// Builds a target, rejecting empty addresses.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::EmptyAddress`] when `address` is blank.
    pub fn new(family: AddressFamily, address: impl Into<String>) -> Result<Self, TargetError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(TargetError::EmptyAddress { family });
        }
        Ok(Self { family, address })
    }

    /// Address family to dial with.
    #[must_use]
    pub const fn family(&self) -> AddressFamily {
        self.family
    }

    /// Concrete address (`host:port` or socket path).
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.family, self.address)
    }
}

/// Parses `tcp:<host:port>` or `unix:<path>`.
impl FromStr for ResolvedTarget {
    type Err = TargetError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (family, address) = input
            .split_once(':')
            .ok_or_else(|| TargetError::MissingFamily(input.to_owned()))?;
        let family = family
            .parse::<AddressFamily>()
            .map_err(|_| TargetError::UnknownFamily {
                family: family.to_owned(),
            })?;
        Self::new(family, address)
    }
}

/// Errors raised while building a [`ResolvedTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The address family tag was not recognised.
    #[error("unknown address family '{family}'")]
    UnknownFamily {
        /// Raw family tag.
        family: String,
    },
    /// The address was empty for the given family.
    #[error("empty {family} address")]
    EmptyAddress {
        /// Family the address was declared with.
        family: AddressFamily,
    },
    /// Text form lacked the `family:` prefix.
    #[error("target '{0}' must be written as <family>:<address>")]
    MissingFamily(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("tcp:127.0.0.1:9999", AddressFamily::Tcp, "127.0.0.1:9999")]
    #[case("UNIX:/tmp/test.sock", AddressFamily::Unix, "/tmp/test.sock")]
    fn parses_target_text(
        #[case] input: &str,
        #[case] family: AddressFamily,
        #[case] address: &str,
    ) {
        let target: ResolvedTarget = input.parse().expect("target");
        assert_eq!(target.family(), family);
        assert_eq!(target.address(), address);
    }

    #[test]
    fn rejects_unknown_family_text() {
        let error = "sctp:10.0.0.1:1".parse::<ResolvedTarget>().expect_err("family");
        assert_eq!(
            error,
            TargetError::UnknownFamily {
                family: "sctp".to_owned()
            }
        );
    }

    #[test]
    fn rejects_blank_address() {
        let error = ResolvedTarget::new(AddressFamily::Unix, "  ").expect_err("blank");
        assert_eq!(
            error,
            TargetError::EmptyAddress {
                family: AddressFamily::Unix
            }
        );
    }

    #[test]
    fn displays_with_family_prefix() {
        let target = ResolvedTarget::new(AddressFamily::Tcp, "10.1.2.3:80").expect("target");
        assert_eq!(target.to_string(), "tcp:10.1.2.3:80");
    }
}
