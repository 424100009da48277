use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::debug;

use crate::core::error::Result;

/// Handle to a periodic background task bound to its owner's lifetime.
///
/// The task sleeps on a shutdown channel between passes, so stopping it
/// interrupts the wait immediately while a pass already in flight runs to
/// completion before `stop` returns.
#[derive(Debug)]
pub struct CompactionHandle {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionHandle {
    /// Spawn a named worker thread invoking `tick` every `interval`.
    /// `tick` returns false when its owner is gone and the loop should end.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (shutdown, signal) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name(format!("nyaru-compact-{}", name))
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if !tick() {
                    break;
                }
            })?;
        debug!(task = name, "started compaction task");
        Ok(CompactionHandle {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Cancel the task and wait for the current pass to complete.
    pub fn stop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CompactionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut handle = CompactionHandle::spawn("test", Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(40));
        handle.stop();
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 2);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn false_tick_ends_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let _handle = CompactionHandle::spawn("test", Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst) < 1
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
