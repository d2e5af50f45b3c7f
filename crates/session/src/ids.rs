use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Session-wide source of image identifiers (`img_1`, `img_2`, ...).
///
/// Clones share one counter, so identifiers are strictly increasing and never
/// reused for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct ImageIdAllocator {
    counter: Arc<AtomicU64>,
}

impl ImageIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next identifier.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("img_{n}")
    }
}
