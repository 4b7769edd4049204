//! Priority admission to a shared OLAP engine.
//!
//! [`PriorityGate`] hands out a fixed number of [`Permit`]s. When none are
//! free, callers queue and are admitted in rank order as permits come back.
//!
//! # Aging
//!
//! A waiter's rank is fixed when it queues:
//!
//! ```text
//! rank = enqueued_at - priority * aging_interval
//! ```
//!
//! The lowest rank is admitted first. Each priority level is therefore worth
//! one `aging_interval` of waiting: a priority-0 query that has waited
//! `k * aging_interval` outranks any priority-`k` query that arrives after it.
//! Because priorities are bounded, a waiter is overtaken by at most the
//! queries that arrive within `max_priority * aging_interval` of it, so no
//! query waits forever behind a stream of more urgent work. Ties go to the
//! earlier arrival.

use super::context::Priority;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Priority-ordered admission with a fixed number of slots.
#[derive(Debug, Clone)]
pub struct PriorityGate {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<GateState>,
    aging_interval: Duration,
    epoch: Instant,
}

#[derive(Debug)]
struct GateState {
    available: usize,
    waiting: BinaryHeap<Waiter>,
    next_seq: u64,
}

#[derive(Debug)]
struct Waiter {
    rank: i128,
    seq: u64,
    tx: oneshot::Sender<Permit>,
}

// BinaryHeap is a max-heap; the smallest (rank, seq) must compare greatest.
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for Waiter {}

/// A slot on the OLAP engine. Returned to the gate on drop.
#[derive(Debug)]
pub struct Permit {
    /// `None` once the permit has been handed back or defused.
    shared: Option<Arc<Shared>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Shared::release(&shared);
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pass a returned slot to the best live waiter, or mark it free.
    fn release(this: &Arc<Self>) {
        let mut state = this.lock();
        while let Some(waiter) = state.waiting.pop() {
            let permit = Permit {
                shared: Some(Arc::clone(this)),
            };
            match waiter.tx.send(permit) {
                Ok(()) => return,
                // The waiter gave up; its permit must not re-enter release
                // while we hold the lock.
                Err(mut permit) => permit.shared = None,
            }
        }
        state.available += 1;
    }

    fn rank(&self, priority: Priority) -> i128 {
        let waited = Instant::now().duration_since(self.epoch).as_nanos();
        let credit = u128::from(priority.get()) * self.aging_interval.as_nanos();
        i128::try_from(waited).unwrap_or(i128::MAX) - i128::try_from(credit).unwrap_or(i128::MAX)
    }
}

impl PriorityGate {
    /// A gate with `slots` concurrent permits.
    #[must_use]
    pub fn new(slots: usize, aging_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(GateState {
                    available: slots,
                    waiting: BinaryHeap::new(),
                    next_seq: 0,
                }),
                aging_interval,
                epoch: Instant::now(),
            }),
        }
    }

    /// Wait for a permit.
    ///
    /// Cancel-safe: dropping the future before it resolves gives up the place
    /// in the queue, and a permit already handed to it returns to the gate.
    ///
    /// # Errors
    ///
    /// Returns `Error::Execution` if the gate was torn down while waiting.
    pub async fn acquire(&self, priority: Priority) -> Result<Permit> {
        let rx = {
            let mut state = self.shared.lock();
            if state.available > 0 {
                state.available -= 1;
                return Ok(Permit {
                    shared: Some(Arc::clone(&self.shared)),
                });
            }

            // Forget waiters that have already given up
            state.waiting.retain(|w| !w.tx.is_closed());

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(Waiter {
                rank: self.shared.rank(priority),
                seq,
                tx,
            });
            rx
        };

        rx.await
            .map_err(|_| Error::Execution("query scheduler shut down".to_string()))
    }

    /// Free permits right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.lock().available
    }

    /// Callers currently queued (including ones that gave up but have not
    /// been pruned yet).
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.lock().waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn prio(p: u32) -> Priority {
        Priority::new(i64::from(p), 1000).unwrap()
    }

    #[tokio::test]
    async fn test_permits_are_returned_on_drop() {
        let gate = PriorityGate::new(2, Duration::from_millis(100));
        let a = gate.acquire(prio(0)).await.unwrap();
        let b = gate.acquire(prio(0)).await.unwrap();
        assert_eq!(gate.available(), 0);
        drop(a);
        assert_eq!(gate.available(), 1);
        drop(b);
        assert_eq!(gate.available(), 2);
    }

    /// Queue `waiters` behind a held permit, `spacing` apart, release the
    /// permit, and return the order in which the waiters were admitted.
    async fn admission_order(
        gate: &PriorityGate,
        waiters: &[(u32, &'static str)],
        spacing: Duration,
    ) -> Vec<&'static str> {
        let held = gate.acquire(prio(0)).await.unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for &(p, label) in waiters {
            let gate_ref = gate.clone();
            let order_ref = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _permit = gate_ref.acquire(prio(p)).await.unwrap();
                order_ref.lock().unwrap().push(label);
            }));
            while gate.queued() < tasks.len() {
                tokio::task::yield_now().await;
            }
            tokio::time::advance(spacing).await;
        }

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }
        let admitted = order.lock().unwrap().clone();
        admitted
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_priority_admitted_first() {
        let gate = PriorityGate::new(1, Duration::from_millis(100));
        let order = admission_order(
            &gate,
            &[(1, "low"), (50, "high"), (10, "mid")],
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(order, vec!["high", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_priority_is_fifo() {
        let gate = PriorityGate::new(1, Duration::from_millis(100));
        let order = admission_order(
            &gate,
            &[(5, "first"), (5, "second"), (5, "third")],
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aged_waiter_beats_newer_urgent_work() {
        let waiters = [(0, "old"), (5, "urgent")];

        // Arriving shortly after, the urgent query overtakes
        let gate = PriorityGate::new(1, Duration::from_millis(10));
        let order = admission_order(&gate, &waiters, Duration::from_millis(1)).await;
        assert_eq!(order, vec!["urgent", "old"]);

        // After waiting longer than 5 levels are worth, the old one goes first
        let gate = PriorityGate::new(1, Duration::from_millis(10));
        let order = admission_order(&gate, &waiters, Duration::from_millis(60)).await;
        assert_eq!(order, vec!["old", "urgent"]);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_leak_permit() {
        let gate = PriorityGate::new(1, Duration::from_millis(100));
        let held = gate.acquire(prio(0)).await.unwrap();

        let waiting = gate.clone();
        let abandoned = tokio::spawn(async move { waiting.acquire(prio(9)).await.map(drop) });
        while gate.queued() < 1 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;

        drop(held);
        assert_eq!(gate.available(), 1);
        let _again = gate.acquire(prio(0)).await.unwrap();
    }
}
