// Copyright 2025 Cowboy AI, LLC.

//! Cooperative cancellation for replay runs
//!
//! Replay polls its token between pages and between events, so cancellation
//! takes effect at the next boundary. Each replay job derives its own token;
//! cancelling one never affects another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A revocable cancellation signal
///
/// Cloning shares the signal: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the token cancelled; irrevocable
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
