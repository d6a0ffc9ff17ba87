//! Command implementations.

pub mod client;
pub mod serve;
