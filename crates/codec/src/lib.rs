//! ## Tunnel wire format
//!
//! The tunnel speaks a tiny datagram protocol: every packet starts with an
//! 8 byte header carrying a little-endian sender identifier and receiver
//! identifier, followed by an opaque payload that is forwarded as-is. Two
//! identifier patterns are carved out of the relay space for subprotocols,
//! a fixed-size latency probe and a password-gated maintenance command.
//!
//! A second, independent wire format lives on the reflection port: a
//! STUN-like request/reply pair that echoes the requester's public address
//! back to it in an obfuscated form.
//!
//! This crate is pure byte handling. It owns no sockets, no locks and no
//! clocks, which is what keeps it trivially testable.

pub mod crypto;
pub mod packet;
pub mod reflection;
