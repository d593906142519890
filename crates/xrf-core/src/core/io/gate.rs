use std::sync::{Mutex, PoisonError};

/// Process-wide critical section for file-library calls.
///
/// Loading and writing happen inside [`IoGate::run`]; pixel fitting never takes the lock.
#[derive(Debug, Default)]
pub struct IoGate {
    lock: Mutex<()>,
}

impl IoGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the gate. A poisoned gate is recovered.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
