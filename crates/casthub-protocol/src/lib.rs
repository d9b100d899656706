//! CastHub Protocol - Wire protocol for broker communication
//!
//! This crate provides the packet envelopes exchanged between extensions
//! and the CastHub broker, and the nested extension-to-extension payloads
//! routed through it.

pub mod packet;

pub use packet::{ExtensionPacket, PacketType, ProtocolError, ServerPacket};
