//! Core types for Relayline.
//!
//! This crate defines the tagged frames exchanged over the transport, the
//! error types surfaced to callers, and the engine configuration. It contains
//! no business logic.

pub mod config;
pub mod error;
pub mod frame;
