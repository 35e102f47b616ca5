use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Number of viewers currently in the connected state. Clones share the value.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCounter {
    inner: Arc<AtomicI64>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> i64 {
        self.inner.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decrement(&self) -> i64 {
        self.inner.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn get(&self) -> i64 {
        self.inner.load(Ordering::Acquire)
    }
}
