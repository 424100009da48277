use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{Error, Result};

/// Cooperative cancellation flag shared between a collection, its result
/// streams and its background compaction task.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-operation deadline. Long-running operations call `check` at their
/// suspension points (shard boundaries, stream elements).
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Deadline(timeout.map(|t| Instant::now() + t))
    }

    pub fn unbounded() -> Self {
        Deadline(None)
    }

    pub fn check(&self) -> Result<()> {
        match self.0 {
            Some(at) if Instant::now() > at => Err(Error::Timeout),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_trips_once_cancelled() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn deadline_expires() {
        let deadline = Deadline::after(Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(deadline.check(), Err(Error::Timeout)));
        assert!(Deadline::unbounded().check().is_ok());
    }
}
