//! Sliding-window admission control shared by every call of one API client.
//!
//! The gate holds `N` slots. Taking a slot records the instant it falls back out of
//! the window (`admission + W`) in a FIFO ledger. Slots whose exit instant has passed
//! are returned lazily by whoever touches the gate next: waiters sleep until the
//! oldest exit, release it under the ledger lock, and keep their place in the
//! `tokio::sync::Semaphore` queue (which is fair). No window of length `W` ever
//! contains more than `N` gated admissions, including the very first `N`.
//!
//! Priority admissions never wait. When no slot is free they are recorded as debt,
//! and the next returning slot pays the debt instead of reopening capacity.

use crate::config::RateLimit;
use crate::error::ApiError;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Rolling-window rate gate with priority bypass.
///
/// Not `Clone`: the gate belongs to one client. Share it through the client (or an `Arc`).
/// Holds no background task, so it may be used from any runtime, one after another.
#[derive(Debug)]
pub struct RateGate {
    limit: RateLimit,
    state: Option<Arc<GateState>>,
}

#[derive(Debug)]
struct GateState {
    window: Duration,
    permits: Semaphore,
    ledger: Mutex<Ledger>,
    exit_recorded: Notify,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Instants at which taken slots leave the window, oldest first
    exits: VecDeque<Instant>,
    /// Priority admissions taken while the gate was full
    debt: usize,
}

impl RateGate {
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        let state = limit.has_limit().then(|| {
            let capacity = usize::try_from(limit.occurrences())
                .unwrap_or(usize::MAX)
                .min(Semaphore::MAX_PERMITS);
            Arc::new(GateState {
                window: limit.window(),
                permits: Semaphore::new(capacity),
                ledger: Mutex::new(Ledger::default()),
                exit_recorded: Notify::new(),
            })
        });
        Self { limit, state }
    }

    /// A gate that admits everything immediately.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(RateLimit::unlimited())
    }

    #[must_use]
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Slots a normal caller could take right now; `None` for an unlimited gate.
    #[must_use]
    pub fn available_slots(&self) -> Option<usize> {
        self.state.as_ref().map(|state| {
            state.release_due(Instant::now());
            let debt = state.ledger.lock().debt;
            state.permits.available_permits().saturating_sub(debt)
        })
    }

    /// Wait until a slot is free and take it.
    pub async fn wait_to_proceed(&self) {
        if let Some(state) = &self.state {
            state.admit().await;
        }
    }

    /// Like [`wait_to_proceed`](Self::wait_to_proceed), but gives up when `cancel` fires.
    ///
    /// # Errors
    /// Returns `ApiError::Cancelled` if the token is (or becomes) cancelled before a
    /// slot is taken. No slot is consumed in that case.
    pub async fn wait_to_proceed_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let Some(state) = &self.state else {
            return if cancel.is_cancelled() {
                Err(ApiError::Cancelled)
            } else {
                Ok(())
            };
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ApiError::Cancelled),
            () = state.admit() => Ok(()),
        }
    }

    /// Like [`wait_to_proceed`](Self::wait_to_proceed), bounded by `timeout`.
    ///
    /// # Errors
    /// Returns `ApiError::Timeout` if no slot became free in time. No slot is consumed
    /// in that case.
    pub async fn wait_to_proceed_timeout(&self, timeout: Duration) -> Result<(), ApiError> {
        tokio::time::timeout(timeout, self.wait_to_proceed())
            .await
            .map_err(|_| ApiError::Timeout(timeout))
    }

    /// Account for a call that bypassed the gate. Never blocks.
    pub fn notify_priority_call_made(&self) {
        if let Some(state) = &self.state {
            state.admit_priority();
        }
    }

    /// Pace the items of `source` through this gate, one slot per item.
    pub fn throttle<'a, S>(&'a self, source: S) -> impl Stream<Item = S::Item> + 'a
    where
        S: Stream + 'a,
        S::Item: 'a,
    {
        source.then(move |item| async move {
            self.wait_to_proceed().await;
            item
        })
    }
}

impl GateState {
    async fn admit(&self) {
        // Pinned once so the waiter keeps its place in the semaphore queue
        let acquire = self.permits.acquire();
        tokio::pin!(acquire);

        loop {
            self.release_due(Instant::now());

            let recorded = self.exit_recorded.notified();
            tokio::pin!(recorded);
            recorded.as_mut().enable();
            let next_exit = self.ledger.lock().exits.front().copied();

            tokio::select! {
                biased;
                acquired = &mut acquire => {
                    // Closing is never requested, so a failed acquire cannot happen in practice.
                    let Ok(permit) = acquired else {
                        return;
                    };
                    permit.forget();
                    self.record_exit();
                    tracing::trace!("rate gate admitted call");
                    return;
                }
                () = sleep_until_exit(next_exit) => {}
                () = &mut recorded => {}
            }
        }
    }

    fn admit_priority(&self) {
        self.release_due(Instant::now());
        let mut ledger = self.ledger.lock();
        match self.permits.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => ledger.debt += 1,
            Err(TryAcquireError::Closed) => return,
        }
        ledger.exits.push_back(Instant::now() + self.window);
        let debt = ledger.debt;
        drop(ledger);
        self.exit_recorded.notify_waiters();
        tracing::trace!(debt, "rate gate recorded priority call");
    }

    fn record_exit(&self) {
        self.ledger
            .lock()
            .exits
            .push_back(Instant::now() + self.window);
        self.exit_recorded.notify_waiters();
    }

    /// Return every slot whose exit instant is not after `now`.
    fn release_due(&self, now: Instant) {
        let mut ledger = self.ledger.lock();
        let mut freed = 0;
        while ledger.exits.front().is_some_and(|exit| *exit <= now) {
            ledger.exits.pop_front();
            if ledger.debt > 0 {
                ledger.debt -= 1;
            } else {
                freed += 1;
            }
        }
        if freed > 0 {
            self.permits.add_permits(freed);
        }
    }
}

/// Sleep until `exit`; forever when no slot is out.
async fn sleep_until_exit(exit: Option<Instant>) {
    match exit {
        Some(exit) => tokio::time::sleep_until(exit).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn gate(occurrences: u32, window_ms: u64) -> RateGate {
        RateGate::new(RateLimit::new(
            occurrences,
            Duration::from_millis(window_ms),
        ))
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_n_admitted_without_delay() {
        let gate = gate(3, 1000);
        let start = Instant::now();
        for _ in 0..3 {
            gate.wait_to_proceed().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.available_slots(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_after_capacity_waits_one_window() {
        let gate = gate(3, 1000);
        let start = Instant::now();
        let mut admitted = Vec::new();
        for _ in 0..5 {
            gate.wait_to_proceed().await;
            admitted.push(start.elapsed());
        }
        assert_eq!(
            admitted,
            vec![ms(0), ms(0), ms(0), ms(1000), ms(1000)],
            "calls 4 and 5 wait for the first slots to leave the window"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_per_second_fifth_call_after_two_seconds() {
        let gate = gate(2, 1000);
        let start = Instant::now();
        for _ in 0..4 {
            gate.wait_to_proceed().await;
        }
        assert!(start.elapsed() < ms(2000));

        gate.wait_to_proceed().await;
        assert!(start.elapsed() >= ms(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_with_each_admission() {
        let gate = gate(2, 1000);
        let start = Instant::now();
        gate.wait_to_proceed().await;
        tokio::time::sleep(ms(400)).await;
        gate.wait_to_proceed().await;

        gate.wait_to_proceed().await;
        assert_eq!(start.elapsed(), ms(1000));
        gate.wait_to_proceed().await;
        assert_eq!(start.elapsed(), ms(1400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_call_consumes_capacity() {
        let gate = gate(3, 1000);
        let start = Instant::now();
        for _ in 0..3 {
            gate.wait_to_proceed().await;
        }

        gate.notify_priority_call_made();
        assert_eq!(start.elapsed(), Duration::ZERO, "priority never blocks");

        gate.wait_to_proceed().await;
        assert_eq!(start.elapsed(), ms(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_overdraft_is_repaid_before_capacity_reopens() {
        let gate = gate(3, 1000);
        let start = Instant::now();
        for _ in 0..3 {
            gate.wait_to_proceed().await;
        }
        tokio::time::sleep(ms(500)).await;
        gate.notify_priority_call_made();
        assert_eq!(gate.available_slots(), Some(0));

        let mut admitted = Vec::new();
        for _ in 0..3 {
            gate.wait_to_proceed().await;
            admitted.push(start.elapsed());
        }
        assert_eq!(admitted, vec![ms(1000), ms(1000), ms(1500)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_uses_free_slot_when_available() {
        let gate = gate(2, 1000);
        gate.notify_priority_call_made();
        assert_eq!(gate.available_slots(), Some(1));
        gate.wait_to_proceed().await;
        assert_eq!(gate.available_slots(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_window() {
        let gate = Arc::new(gate(4, 500));
        let admitted = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let admitted = Arc::clone(&admitted);
                tokio::spawn(async move {
                    gate.wait_to_proceed().await;
                    admitted.lock().push(Instant::now());
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut admitted = admitted.lock().clone();
        admitted.sort();
        assert_eq!(admitted.len(), 40);
        for (earlier, later) in admitted.iter().zip(admitted.iter().skip(4)) {
            assert!(*later - *earlier >= ms(500));
        }
        assert_eq!(start.elapsed(), ms(4500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_multithreaded_callers_are_throttled() {
        let gate = Arc::new(gate(3, 200));
        let start = std::time::Instant::now();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.wait_to_proceed().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= ms(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_consume_slot() {
        let gate = Arc::new(gate(1, 1000));
        let start = Instant::now();
        gate.wait_to_proceed().await;

        let token = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let token = token.clone();
            tokio::spawn(async move { gate.wait_to_proceed_or_cancel(&token).await })
        };
        tokio::time::sleep(ms(100)).await;
        token.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ApiError::Cancelled)));

        gate.wait_to_proceed().await;
        assert_eq!(start.elapsed(), ms(1000));
        gate.wait_to_proceed().await;
        assert_eq!(start.elapsed(), ms(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_takes_no_slot() {
        let gate = gate(1, 1000);
        let token = CancellationToken::new();
        token.cancel();

        let result = gate.wait_to_proceed_or_cancel(&token).await;
        assert!(matches!(result, Err(ApiError::Cancelled)));
        assert_eq!(gate.available_slots(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let gate = gate(1, 1000);
        let start = Instant::now();
        gate.wait_to_proceed().await;

        let result = gate.wait_to_proceed_timeout(ms(200)).await;
        assert!(matches!(result, Err(ApiError::Timeout(d)) if d == ms(200)));

        gate.wait_to_proceed_timeout(ms(5000)).await.unwrap();
        assert_eq!(start.elapsed(), ms(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_blocks() {
        let gate = gate(0, 1000);
        let start = Instant::now();
        for _ in 0..1000 {
            gate.wait_to_proceed().await;
            gate.notify_priority_call_made();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.available_slots(), None);
        assert!(
            gate.wait_to_proceed_or_cancel(&CancellationToken::new())
                .await
                .is_ok()
        );
    }

    #[test]
    fn test_gate_outlives_the_runtime_that_first_used_it() {
        let runtime = || {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap()
        };
        let gate = gate(1, 100);

        let first = runtime();
        first.block_on(gate.wait_to_proceed());
        drop(first);
        std::thread::sleep(ms(300));

        let second = runtime();
        let result = second.block_on(gate.wait_to_proceed_timeout(ms(2000)));
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(gate.available_slots(), Some(0));
    }

    #[test]
    fn test_slot_out_of_window_is_returned_without_a_runtime() {
        let gate = gate(1, 50);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(gate.wait_to_proceed());
        drop(runtime);
        assert_eq!(gate.available_slots(), Some(0));

        std::thread::sleep(ms(120));
        assert_eq!(gate.available_slots(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_paces_stream_items() {
        let gate = gate(2, 1000);
        let start = Instant::now();

        let paced: Vec<(u32, Duration)> = gate
            .throttle(futures::stream::iter(1..=5))
            .map(|item| (item, start.elapsed()))
            .collect()
            .await;

        assert_eq!(
            paced,
            vec![
                (1, ms(0)),
                (2, ms(0)),
                (3, ms(1000)),
                (4, ms(1000)),
                (5, ms(2000)),
            ]
        );
    }
}
