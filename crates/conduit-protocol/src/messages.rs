//! Request and reply schema for the sidecar resolution protocol.
//!
//! Every message is a single JSON object. Unknown fields are ignored so that
//! older clients keep working against newer sidecars, but the `addr_type`
//! of an open reply is carried as raw text and only becomes an
//! [`AddressFamily`] after explicit validation.

use serde::{Deserialize, Serialize};

use crate::family::{AddressFamily, ResolvedTarget, TargetError};

/// Registers a logical address for inbound service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenRequest {
    /// Logical address to register.
    pub service_addr: String,
}

/// Concrete address the caller must bind to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenReply {
    /// Address handed back by the sidecar.
    pub listen_addr: String,
}

/// Resolves a logical destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OpenRequest {
    /// Logical destination address.
    pub dst_addr: String,
}

/// Resolution result for an [`OpenRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OpenReply {
    /// Address family tag as sent on the wire.
    pub addr_type: String,
    /// Concrete connect address.
    #[serde(default)]
    pub send_addr: String,
}

impl OpenReply {
    /// Builds a reply for a known family.
    #[must_use]
    pub fn new(family: AddressFamily, send_addr: impl Into<String>) -> Self {
        Self {
            addr_type: family.to_string(),
            send_addr: send_addr.into(),
        }
    }

    /// Validates the reply and turns it into a connect target.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::UnknownFamily`] for an unrecognised tag and
    /// [`TargetError::EmptyAddress`] when no address was supplied.
    pub fn into_target(self) -> Result<ResolvedTarget, TargetError> {
        let family = self
            .addr_type
            .parse::<AddressFamily>()
            .map_err(|_| TargetError::UnknownFamily {
                family: self.addr_type.clone(),
            })?;
        ResolvedTarget::new(family, self.send_addr)
    }
}

impl From<&ResolvedTarget> for OpenReply {
    fn from(target: &ResolvedTarget) -> Self {
        Self::new(target.family(), target.address())
    }
}

/// Failure categories a sidecar may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The logical address could not be registered.
    RegistrationRejected,
    /// No mapping exists for the destination.
    UnresolvedDestination,
    /// The request line could not be parsed.
    MalformedRequest,
    /// The sidecar failed internally.
    Internal,
    /// A code introduced by a newer sidecar.
    #[serde(other)]
    Unknown,
}

/// Error reply sent instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorReply {
    /// Failure category.
    pub code: ErrorCode,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
}

impl ErrorReply {
    /// Builds an error reply.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Request envelope written by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Request {
    /// Register a service address.
    Listen(ListenRequest),
    /// Resolve a destination address.
    Open(OpenRequest),
}

impl Request {
    /// Builds a listen request.
    #[must_use]
    pub fn listen(service_addr: impl Into<String>) -> Self {
        Self::Listen(ListenRequest {
            service_addr: service_addr.into(),
        })
    }

    /// Builds an open request.
    #[must_use]
    pub fn open(dst_addr: impl Into<String>) -> Self {
        Self::Open(OpenRequest {
            dst_addr: dst_addr.into(),
        })
    }

    /// Name of the operation, for logging.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Listen(_) => "listen",
            Self::Open(_) => "open",
        }
    }
}

/// Reply envelope written by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// Result of a listen request.
    Listen(ListenReply),
    /// Result of an open request.
    Open(OpenReply),
    /// The request was declined or failed.
    Error(ErrorReply),
}

impl Reply {
    /// Name of the reply kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Listen(_) => "listen",
            Self::Open(_) => "open",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_request_uses_operation_tag() {
        let json = serde_json::to_string(&Request::open("svcA")).expect("serialise");
        assert_eq!(json, r#"{"operation":"open","dst_addr":"svcA"}"#);
    }

    #[test]
    fn replies_ignore_unknown_fields() {
        let json = r#"{"kind":"open","addr_type":"tcp","send_addr":"127.0.0.1:1","weight":3}"#;
        let reply: Reply = serde_json::from_str(json).expect("deserialise");
        assert_eq!(
            reply,
            Reply::Open(OpenReply::new(AddressFamily::Tcp, "127.0.0.1:1"))
        );
    }

    #[test]
    fn unknown_family_survives_decoding_but_fails_validation() {
        let json = r#"{"kind":"open","addr_type":"vsock","send_addr":"3:5000"}"#;
        let Reply::Open(open) = serde_json::from_str(json).expect("deserialise") else {
            panic!("expected open reply");
        };
        let error = open.into_target().expect_err("vsock is not supported");
        assert_eq!(
            error,
            TargetError::UnknownFamily {
                family: "vsock".to_owned()
            }
        );
    }

    #[test]
    fn missing_send_addr_is_rejected_on_validation() {
        let open = OpenReply {
            addr_type: "unix".to_owned(),
            send_addr: String::new(),
        };
        assert!(matches!(
            open.into_target(),
            Err(TargetError::EmptyAddress { .. })
        ));
    }

    #[test]
    fn future_error_codes_decode_as_unknown() {
        let json = r#"{"kind":"error","code":"quota_exceeded","message":"later"}"#;
        let reply: Reply = serde_json::from_str(json).expect("deserialise");
        assert_eq!(
            reply,
            Reply::Error(ErrorReply::new(ErrorCode::Unknown, "later"))
        );
    }
}
