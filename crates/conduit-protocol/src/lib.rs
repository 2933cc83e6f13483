//! Wire schema for the sidecar address-resolution protocol.
//!
//! Two operations are defined. `Listen` registers a logical service address
//! and returns the concrete address to bind; `Open` resolves a logical
//! destination into an [`AddressFamily`] and a connect address. Messages are
//! framed as newline-delimited JSON by the [`codec`] helpers.

pub mod codec;
mod family;
mod messages;

pub use codec::{CodecError, MAX_LINE_BYTES, read_message, write_message};
pub use family::{AddressFamily, ResolvedTarget, TargetError};
pub use messages::{
    ErrorCode, ErrorReply, ListenReply, ListenRequest, OpenReply, OpenRequest, Reply, Request,
};
