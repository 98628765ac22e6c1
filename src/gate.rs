use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-flight gate: at most one scrape runs at a time.
///
/// Acquisition never waits. A caller that finds the gate held is told so
/// immediately and must answer "busy" instead of queueing.
#[derive(Debug, Clone, Default)]
pub struct ScrapeGate {
    busy: Arc<AtomicBool>,
}

impl ScrapeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the gate. Returns `None` when a scrape is already running.
    pub fn try_acquire(&self) -> Option<ScrapeGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .map(|_| ScrapeGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Releases the gate when dropped.
#[derive(Debug)]
pub struct ScrapeGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for ScrapeGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_second_acquire_is_rejected() {
        let gate = ScrapeGate::new();
        let guard = gate.try_acquire();
        assert!(guard.is_some());
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = ScrapeGate::new();
        let other = gate.clone();
        let _guard = gate.try_acquire();
        assert!(other.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_busy_caller_is_not_delayed() {
        let gate = ScrapeGate::new();
        let holder = gate.clone();
        let (held_tx, held_rx) = tokio::sync::oneshot::channel();

        let running = tokio::spawn(async move {
            let _guard = holder.try_acquire().expect("gate should be free");
            let _ = held_tx.send(());
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        held_rx.await.expect("holder task should signal");
        let rejected = tokio::time::timeout(Duration::from_millis(50), async { gate.try_acquire() })
            .await
            .expect("try_acquire must not wait");
        assert!(rejected.is_none());

        running.await.expect("holder task should finish");
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn test_released_when_future_is_dropped() {
        let gate = ScrapeGate::new();
        let holder = gate.clone();
        let task = tokio::spawn(async move {
            let _guard = holder.try_acquire();
            std::future::pending::<()>().await;
        });

        while !gate.is_busy() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(!gate.is_busy());
    }
}
