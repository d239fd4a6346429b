//! Periodic timer that drives a blocking callback.
//!
//! Ticks never overlap: the next one is only scheduled after the previous
//! callback returned. [`PeriodicTimer::stop`] cancels the schedule and
//! waits for a callback that is already running. A panicking callback is
//! logged and the schedule keeps going.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct PeriodicTimer {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Must be called from within a tokio runtime. The first tick fires
    /// immediately.
    pub fn start<F>(period: Duration, sink: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sink = Arc::new(Mutex::new(sink));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // blocking work (process scans, spawn, connect) runs off the async workers
                let tick_sink = Arc::clone(&sink);
                let result = tokio::task::spawn_blocking(move || {
                    // a previous panic poisons the lock; the callback still runs
                    let mut sink = tick_sink.lock().unwrap_or_else(PoisonError::into_inner);
                    (*sink)();
                })
                .await;

                match result {
                    Ok(()) => {}
                    Err(e) if e.is_panic() => tracing::error!("timer callback panicked: {}", e),
                    Err(e) => {
                        tracing::error!("timer callback aborted: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("timer stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |handle| !handle.is_finished())
    }

    /// Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("timer task failed: {}", e);
            }
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
