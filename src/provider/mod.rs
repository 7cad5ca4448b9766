//! Provider implementations.
//!
//! Concrete implementations of the domain-level [`Provider`](crate::Provider)
//! trait. Real transports (MQTT clients and the like) live outside this crate
//! and plug in through the same trait; the in-memory provider here is the
//! reference implementation used by tests and demos.
//!
//! Domain code must not depend on provider-specific types.

mod memory;

pub use memory::{MemoryProvider, SentMessage};
