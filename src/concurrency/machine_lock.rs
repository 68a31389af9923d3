//! Blocking acquisition of machine-wide named locks.
//!
//! Layers lock semantics over the leader's compare-and-swap: a key holding
//! the empty string is free, [`ACQUIRED`] means held. Acquiring polls a
//! CAS from `""` to `"acquired"` every [`POLL_INTERVAL`] until it wins or the
//! caller's context gives up. Waiters race independently, so there is no
//! ordering among them and a waiter can starve.

use std::time::Duration;

use thiserror::Error;

use crate::agentapi::{ApiError, Client, Context, UNLOCKED};

/// Value stored under a key while it is held.
pub const ACQUIRED: &str = "acquired";

/// Pause between acquisition attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum LockError {
    /// Reaching the leader failed, or the caller's context ended.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Release found the key in some state other than [`ACQUIRED`].
    #[error("Lock in invalid state {observed:?} to release")]
    InvalidState { key: String, observed: String },
}

impl LockError {
    /// True when the caller stopped waiting (deadline or cancellation).
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Api(e) if e.is_timeout())
    }
}

/// A named lock shared by every process talking to the same leader.
pub struct MachineLock<'a> {
    client: &'a Client,
    key: String,
    poll_interval: Duration,
}

impl<'a> MachineLock<'a> {
    pub fn new(client: &'a Client, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// One acquisition attempt. `Ok(false)` means someone else holds the key.
    pub async fn try_acquire(&self, ctx: &Context) -> Result<bool, LockError> {
        let (_, swapped) = self
            .client
            .lock_compare_and_swap(ctx, &self.key, UNLOCKED, ACQUIRED)
            .await?;
        Ok(swapped)
    }

    /// Wait until the lock is ours.
    ///
    /// Without a deadline on `ctx` this can wait forever. Transport errors
    /// end the wait immediately instead of spinning against a dead leader.
    ///
    /// If `ctx` ends while a CAS is in flight, the leader may still have
    /// applied it; the key can then be held with nobody believing they own it.
    pub async fn acquire(&self, ctx: &Context) -> Result<(), LockError> {
        loop {
            if self.try_acquire(ctx).await? {
                return Ok(());
            }
            ctx.sleep(self.poll_interval).await?;
        }
    }

    /// Give the lock back. Only the holder should call this.
    pub async fn release(&self, ctx: &Context) -> Result<(), LockError> {
        let (observed, swapped) = self
            .client
            .lock_compare_and_swap(ctx, &self.key, ACQUIRED, UNLOCKED)
            .await?;
        if !swapped {
            return Err(LockError::InvalidState {
                key: self.key.clone(),
                observed,
            });
        }
        Ok(())
    }

    /// Current value of the key. Stale as soon as it returns.
    pub async fn get(&self, ctx: &Context) -> Result<String, LockError> {
        Ok(self.client.lock_get(ctx, &self.key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestLeader;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn acquire_then_release() {
        let leader = TestLeader::start();
        let client = leader.client().await;
        let ctx = Context::background();
        let lock = MachineLock::new(&client, "llama");

        lock.acquire(&ctx).await.unwrap();
        assert_eq!(lock.get(&ctx).await.unwrap(), ACQUIRED);

        lock.release(&ctx).await.unwrap();
        assert_eq!(lock.get(&ctx).await.unwrap(), "");
        assert!(leader.store.is_empty());

        leader.stop().await;
    }

    #[tokio::test]
    async fn try_acquire_reports_contention() {
        let leader = TestLeader::start();
        let a = leader.client().await;
        let b = leader.client().await;
        let ctx = Context::background();

        assert!(MachineLock::new(&a, "llama").try_acquire(&ctx).await.unwrap());
        assert!(!MachineLock::new(&b, "llama").try_acquire(&ctx).await.unwrap());

        leader.stop().await;
    }

    #[tokio::test]
    async fn release_without_acquire_reports_observed_value() {
        let leader = TestLeader::start();
        let client = leader.client().await;
        let ctx = Context::background();

        let err = MachineLock::new(&client, "llama")
            .release(&ctx)
            .await
            .unwrap_err();
        match err {
            LockError::InvalidState { key, observed } => {
                assert_eq!(key, "llama");
                assert_eq!(observed, "");
            }
            other => panic!("expected invalid state, got {}", other),
        }

        leader.store.compare_and_swap("llama", "", "Kuzco");
        let err = MachineLock::new(&client, "llama")
            .release(&ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Lock in invalid state \"Kuzco\" to release");
        assert_eq!(leader.store.get("llama"), "Kuzco");

        leader.stop().await;
    }

    #[tokio::test]
    async fn double_release_fails() {
        let leader = TestLeader::start();
        let client = leader.client().await;
        let ctx = Context::background();
        let lock = MachineLock::new(&client, "llama");

        lock.acquire(&ctx).await.unwrap();
        lock.release(&ctx).await.unwrap();
        assert!(matches!(
            lock.release(&ctx).await,
            Err(LockError::InvalidState { .. })
        ));

        leader.stop().await;
    }

    #[tokio::test]
    async fn expired_deadline_returns_promptly() {
        let leader = TestLeader::start();
        let client = leader.client().await;
        leader.store.compare_and_swap("llama", "", ACQUIRED);

        let ctx = Context::background().with_timeout(Duration::ZERO);
        let start = std::time::Instant::now();
        let err = MachineLock::new(&client, "llama")
            .acquire(&ctx)
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {}", err);
        assert!(start.elapsed() < Duration::from_secs(1));

        leader.stop().await;
    }

    #[tokio::test]
    async fn held_lock_times_out_waiter() {
        let leader = TestLeader::start();
        let client = leader.client().await;
        leader.store.compare_and_swap("llama", "", ACQUIRED);

        let ctx = Context::background().with_timeout(Duration::from_millis(250));
        let start = std::time::Instant::now();
        let err = MachineLock::new(&client, "llama")
            .acquire(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Api(ApiError::DeadlineExceeded)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);

        // A timed-out waiter leaves the holder's value alone.
        assert_eq!(leader.store.get("llama"), ACQUIRED);
        leader.stop().await;
    }

    #[tokio::test]
    async fn cancel_wakes_a_waiter() {
        let leader = TestLeader::start();
        let client = leader.client().await;
        leader.store.compare_and_swap("llama", "", ACQUIRED);

        let ctx = Context::background();
        let waiter_ctx = ctx.child();
        let waiter = tokio::spawn(async move {
            MachineLock::new(&client, "llama")
                .acquire(&waiter_ctx)
                .await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation should end the wait")
            .unwrap();
        assert!(matches!(result, Err(LockError::Api(ApiError::Cancelled))));

        leader.stop().await;
    }

    #[tokio::test]
    async fn dead_leader_is_not_retried() {
        let leader = TestLeader::start();
        let client = leader.client().await;
        leader.store.compare_and_swap("llama", "", ACQUIRED);
        leader.stop().await;

        let err = MachineLock::new(&client, "llama")
            .acquire(&Context::background())
            .await
            .unwrap_err();
        assert!(!err.is_timeout(), "unexpected error: {}", err);
        assert!(matches!(err, LockError::Api(_)));
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let leader = TestLeader::start();
        let holder = leader.client().await;
        let ctx = Context::background();
        MachineLock::new(&holder, "llama").acquire(&ctx).await.unwrap();

        let waiter_client = leader.client().await;
        let waiter_ctx = ctx.with_timeout(Duration::from_secs(5));
        let waiter = tokio::spawn(async move {
            MachineLock::new(&waiter_client, "llama")
                .with_poll_interval(Duration::from_millis(10))
                .acquire(&waiter_ctx)
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        MachineLock::new(&holder, "llama").release(&ctx).await.unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(leader.store.get("llama"), ACQUIRED);

        leader.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contenders_never_overlap() {
        let leader = TestLeader::start();
        let inside = Arc::new(AtomicU32::new(0));
        let entered = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let client = leader.client().await;
            let inside = inside.clone();
            let entered = entered.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = Context::background().with_timeout(Duration::from_secs(10));
                let lock = MachineLock::new(&client, "llama")
                    .with_poll_interval(Duration::from_millis(5));
                for _ in 0..3 {
                    lock.acquire(&ctx).await.unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    entered.fetch_add(1, Ordering::SeqCst);
                    lock.release(&ctx).await.unwrap();
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(entered.load(Ordering::SeqCst), 12);
        leader.stop().await;
    }
}
