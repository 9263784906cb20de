//! Crate containing common functions and types used in Ferry

#[macro_use]
extern crate tracing;

pub mod bus;
pub mod config;
pub mod data;
pub mod error;
pub mod retry;
pub mod time;
