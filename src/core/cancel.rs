use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag for one job. Clones share the flag; once set
/// it stays set.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call was the one that set the flag.
    pub fn set(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
