//! Replication task engine: given a single replication log entry,
//! reliably reproduce the object (or its metadata-only mutation) at a
//! target site.

#[macro_use]
extern crate tracing;

pub mod metrics;
pub mod publisher;
pub mod range;
pub mod session;
pub mod task;
pub mod worker;
