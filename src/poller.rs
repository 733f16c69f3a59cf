//! A cooperative background worker that re-extracts a snapshot on a fixed
//! period, tolerating transient memory-read failures until the first
//! successful read and publishing results through a lock-free swap (§4.P).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use crate::result::{Error, Result};

/// Handle to a running poller. Dropping it does not stop the worker thread;
/// call `stop` explicitly (§4.P).
pub struct Poller<T> {
    cancel: Arc<AtomicBool>,
    snapshot: Arc<ArcSwapOption<T>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl<T: Send + Sync + 'static> Poller<T> {
    /// Spawns a worker that calls `capture` every `period`, storing each
    /// successful result. Before the first successful capture, a
    /// `MemoryReadError` is swallowed and retried next tick rather than
    /// ending the loop — the process may still be finishing attach or the
    /// player may not have loaded in yet (§4.P, §7).
    pub fn start<F>(period: Duration, mut capture: F) -> Self
    where
        F: FnMut() -> Result<T> + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let snapshot: Arc<ArcSwapOption<T>> = Arc::new(ArcSwapOption::from(None));

        let worker_cancel = cancel.clone();
        let worker_snapshot = snapshot.clone();
        let handle = std::thread::spawn(move || {
            let mut seen_once = false;
            while !worker_cancel.load(Ordering::Relaxed) {
                match capture() {
                    Ok(value) => {
                        seen_once = true;
                        worker_snapshot.store(Some(Arc::new(value)));
                    }
                    Err(err) if !seen_once && err.is_transient_memory_read() => {
                        debug!("poller tolerating pre-attach read failure: {err}");
                    }
                    Err(err) => {
                        warn!("poller capture failed: {err}");
                    }
                }
                std::thread::sleep(period);
            }
        });

        Self {
            cancel,
            snapshot,
            handle: Some(handle),
        }
    }

    /// The most recently captured snapshot, if any capture has succeeded
    /// yet.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.snapshot.load_full()
    }

    /// Signals the worker to stop after its current sleep and joins it.
    pub fn stop(mut self) -> Result<()> {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| Error::Cancelled)?;
        }
        Ok(())
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn captures_accumulate_and_stop_joins_cleanly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = counter.clone();
        let poller = Poller::start(Duration::from_millis(5), move || {
            let n = worker_counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(n)
        });

        std::thread::sleep(Duration::from_millis(40));
        assert!(poller.latest().is_some());
        poller.stop().unwrap();
    }

    #[test]
    fn tolerates_transient_errors_before_first_success() {
        let attempt = Arc::new(AtomicUsize::new(0));
        let worker_attempt = attempt.clone();
        let poller = Poller::start(Duration::from_millis(5), move || {
            let n = worker_attempt.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::MemoryRead { addr: 0 })
            } else {
                Ok(n)
            }
        });

        std::thread::sleep(Duration::from_millis(60));
        assert!(poller.latest().is_some());
        poller.stop().unwrap();
    }
}
