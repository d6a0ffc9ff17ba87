//! Identifier generation for peers and request correlation.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Produces `"<counter>-<uuid>"` identifiers.
///
/// The counter gives a readable ordering in logs; the random UUID keeps IDs
/// from different providers (or process restarts) from colliding.
#[derive(Debug, Default)]
pub struct IdProvider {
    last: AtomicU64,
}

impl IdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier. The first call yields counter value 1.
    pub fn next_id(&self) -> String {
        let next = self.last.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{next}-{}", Uuid::new_v4())
    }
}
