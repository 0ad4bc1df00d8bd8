//! Round-robin backend selection.

use crate::proxy::backend::Backend;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotates through a fixed, ordered list of backends, skipping any that
/// fail their liveness probe.
///
/// The cursor is a lock-free atomic counter, always taken modulo the list
/// length. Concurrent callers may interleave claims and drift from a strict
/// rotation; that is accepted, fairness here is best-effort.
pub struct Selector<B: Backend> {
    backends: Vec<B>,
    cursor: AtomicUsize,
}

impl<B: Backend> Selector<B> {
    /// Creates a selector over `backends`, starting at the first one.
    ///
    /// # Panics
    ///
    /// Panics if `backends` is empty. Callers validate configuration before
    /// constructing a selector.
    pub fn new(backends: Vec<B>) -> Self {
        assert!(!backends.is_empty(), "selector requires at least one backend");

        Self {
            backends,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of configured backends.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Returns the next live backend in rotation.
    ///
    /// Claims the current cursor slot, probes that backend, and returns it
    /// if alive; otherwise moves on to the next one. With all backends
    /// alive, consecutive calls visit them in configured order, one step
    /// per call.
    ///
    /// There is no retry cap: if every backend is down this keeps cycling
    /// and re-probing until one recovers, so callers must not rely on a
    /// timeout from this method. A warning is logged once per fully failed
    /// sweep.
    pub async fn next(&self) -> &B {
        let mut skipped = 0usize;

        loop {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.backends.len();
            let backend = &self.backends[idx];

            if backend.is_alive().await {
                return backend;
            }

            tracing::debug!(
                backend = %backend.address(),
                "Backend failed liveness probe, trying next"
            );

            skipped += 1;
            if skipped % self.backends.len() == 0 {
                tracing::warn!(
                    probes_failed = skipped,
                    "No backend passed its liveness probe, continuing to retry"
                );
            }
        }
    }
}
