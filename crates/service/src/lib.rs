//! ## Tunnel state
//!
//! Everything the relay remembers between datagrams lives here: the client
//! table with its admission policy, the maintenance command gate, and the
//! reflection responder's rate limiter.
//!
//! The client table, the per-IP admission counter and the probe quota form
//! one logical unit and share a single exclusive lock; admission decisions
//! must see a consistent view of all three. The reflection limiter serves
//! an unrelated socket and gets its own lock.

pub mod command;
pub mod limiter;
pub mod session;
