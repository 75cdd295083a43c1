//! Cooperative pause/cancel control shared by every suspension point in the
//! extraction engine and the sorting pipeline.
//!
//! A single [`checkpoint`] call implements both pause ("wait until resumed")
//! and cancellation ("raise and unwind") per spec §5. Every queue put, every
//! writer commit, every batch boundary in sorting calls it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

const STATE_RUNNING: u8 = 0;
const STATE_PAUSED: u8 = 1;
const STATE_CANCELLED: u8 = 2;

/// Raised by [`checkpoint`] once a job has been cancelled. Propagates through
/// `?` until it unwinds the worker/writer task it was raised in.
#[derive(Debug, Clone, thiserror::Error)]
#[error("job {job_id} was cancelled")]
pub struct JobCancelled {
    pub job_id: String,
}

#[derive(Debug)]
struct Inner {
    state: AtomicU8,
    resumed: Notify,
}

/// Handle to a job's cooperative control flags. Cheaply cloneable; every
/// worker, writer, and sorting step holds a clone and calls [`checkpoint`]
/// between units of work.
#[derive(Debug, Clone)]
pub struct JobControl {
    job_id: Arc<str>,
    inner: Arc<Inner>,
}

impl JobControl {
    pub fn new(job_id: impl Into<Arc<str>>) -> Self {
        Self {
            job_id: job_id.into(),
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_RUNNING),
                resumed: Notify::new(),
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Request a pause. Takes effect at the next [`checkpoint`] call.
    pub fn pause(&self) {
        let _ = self
            .inner
            .state
            .compare_exchange(STATE_RUNNING, STATE_PAUSED, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Resume a paused job. Wakes every task currently blocked in
    /// [`checkpoint`].
    pub fn resume(&self) {
        if self
            .inner
            .state
            .compare_exchange(STATE_PAUSED, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.resumed.notify_waiters();
        }
    }

    /// Request cancellation. Irreversible; wakes any paused waiters so they
    /// observe the cancellation rather than waiting forever.
    pub fn cancel(&self) {
        self.inner.state.store(STATE_CANCELLED, Ordering::SeqCst);
        self.inner.resumed.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_CANCELLED
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_PAUSED
    }

    /// Poll the control flags. Blocks (cooperatively) while paused; returns
    /// `Err(JobCancelled)` once cancellation is observed, whether that
    /// happens immediately or after a pause resumes into cancellation.
    pub async fn checkpoint(&self) -> Result<(), JobCancelled> {
        loop {
            match self.inner.state.load(Ordering::SeqCst) {
                STATE_CANCELLED => {
                    return Err(JobCancelled {
                        job_id: self.job_id.to_string(),
                    })
                }
                STATE_PAUSED => {
                    self.inner.resumed.notified().await;
                    continue;
                }
                _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_passes_through_when_running() {
        let control = JobControl::new("job-1");
        assert!(control.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_returns_cancelled_after_cancel() {
        let control = JobControl::new("job-1");
        control.cancel();
        let err = control.checkpoint().await.unwrap_err();
        assert_eq!(err.job_id, "job-1");
    }

    #[tokio::test]
    async fn checkpoint_blocks_while_paused_then_resumes() {
        let control = JobControl::new("job-1");
        control.pause();
        assert!(control.is_paused());

        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.checkpoint().await });

        tokio::task::yield_now().await;
        control.resume();

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_wakes_a_paused_waiter() {
        let control = JobControl::new("job-1");
        control.pause();

        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.checkpoint().await });

        tokio::task::yield_now().await;
        control.cancel();

        assert!(handle.await.unwrap().is_err());
    }
}
