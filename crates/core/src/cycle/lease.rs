use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Right to run a cycle. At most one [`LeaseGuard`] exists at a time.
#[derive(Debug, Clone, Default)]
pub struct CycleLease {
    held: Arc<AtomicBool>,
}

/// Releases the lease when dropped, including on panic or task abort.
#[derive(Debug)]
pub struct LeaseGuard {
    held: Arc<AtomicBool>,
}

impl CycleLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<LeaseGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LeaseGuard {
                held: Arc::clone(&self.held),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
