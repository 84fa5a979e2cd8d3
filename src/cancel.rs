use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A handle for cancelling statement execution.
///
/// Clones share the same flag, so a token can be cancelled from another thread
/// while a read sequence is being consumed. Checked before a connection is
/// opened and before every row fetch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
