//! Gateways of the Ferry replication engine: authenticated clients to
//! the source object service and to the cross-backend put surface.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod destination;
pub mod hosts;
pub mod source;
pub mod stream;
