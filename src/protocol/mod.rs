//! Wire-level protocol: error taxonomy, primitive codec and message bodies.
//!
//! Framing, headers and authentication belong to the transport and are not
//! part of this crate; the types here describe message *bodies* only.

pub mod error;
pub mod messages;
pub mod wire;
