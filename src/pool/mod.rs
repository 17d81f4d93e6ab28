//! Hierarchical concurrency pool
//!
//! The pool holds two global slot counts, one for fast HTTP plugins and one
//! for headless-browser plugins. A top-level request registers itself and
//! receives a [`RequestBudget`]; plugin invocations acquire permits from the
//! budget, which is bounded by the request's fair share
//! `max(1, slots / active_requests)` — never directly from the global pool.
//! Fair shares are recomputed on every acquire, so finishing requests
//! immediately widen the shares of the survivors.
//!
//! Permits are scoped: dropping a [`BudgetPermit`] (success, error or
//! cancellation) releases the slot and wakes waiters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Which global slot class a plugin draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    FastHttp,
    Headless,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolSnapshot {
    pub fast_slots: usize,
    pub headless_slots: usize,
    pub active_requests: usize,
    pub fast_busy: usize,
    pub headless_busy: usize,
}

#[derive(Debug)]
pub struct ConcurrencyPool {
    fast_slots: usize,
    headless_slots: usize,
    active: AtomicUsize,
    fast_busy: AtomicUsize,
    headless_busy: AtomicUsize,
    changed: Notify,
}

impl ConcurrencyPool {
    pub fn new(fast_slots: usize, headless_slots: usize) -> Arc<Self> {
        Arc::new(Self {
            fast_slots: fast_slots.max(1),
            headless_slots: headless_slots.max(1),
            active: AtomicUsize::new(0),
            fast_busy: AtomicUsize::new(0),
            headless_busy: AtomicUsize::new(0),
            changed: Notify::new(),
        })
    }

    /// Register a top-level request and hand out its budget.
    pub fn register(self: &Arc<Self>) -> RequestBudget {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
        RequestBudget {
            pool: Arc::clone(self),
            fast_in_flight: AtomicUsize::new(0),
            headless_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn slots(&self, kind: SlotKind) -> usize {
        match kind {
            SlotKind::FastHttp => self.fast_slots,
            SlotKind::Headless => self.headless_slots,
        }
    }

    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            fast_slots: self.fast_slots,
            headless_slots: self.headless_slots,
            active_requests: self.active.load(Ordering::SeqCst),
            fast_busy: self.fast_busy.load(Ordering::SeqCst),
            headless_busy: self.headless_busy.load(Ordering::SeqCst),
        }
    }

    fn busy_counter(&self, kind: SlotKind) -> &AtomicUsize {
        match kind {
            SlotKind::FastHttp => &self.fast_busy,
            SlotKind::Headless => &self.headless_busy,
        }
    }
}

/// Per-request slice of the pool. Dropping it deregisters the request.
#[derive(Debug)]
pub struct RequestBudget {
    pool: Arc<ConcurrencyPool>,
    fast_in_flight: AtomicUsize,
    headless_in_flight: AtomicUsize,
}

impl RequestBudget {
    /// Fair share at this instant: `max(1, slots / active_requests)`
    pub fn fair_share(&self, kind: SlotKind) -> usize {
        let active = self.pool.active_requests().max(1);
        (self.pool.slots(kind) / active).max(1)
    }

    fn in_flight_counter(&self, kind: SlotKind) -> &AtomicUsize {
        match kind {
            SlotKind::FastHttp => &self.fast_in_flight,
            SlotKind::Headless => &self.headless_in_flight,
        }
    }

    pub fn in_flight(&self, kind: SlotKind) -> usize {
        self.in_flight_counter(kind).load(Ordering::SeqCst)
    }

    /// Take a permit, waiting until the request's in-flight count drops
    /// below its fair share. Cancellation = dropping this future.
    pub async fn acquire(&self, kind: SlotKind) -> BudgetPermit<'_> {
        loop {
            // Register interest before the check so a release between the
            // check and the await cannot be missed.
            let notified = self.pool.changed.notified();

            let counter = self.in_flight_counter(kind);
            let current = counter.load(Ordering::SeqCst);
            if current < self.fair_share(kind)
                && counter
                    .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                self.pool.busy_counter(kind).fetch_add(1, Ordering::SeqCst);
                return BudgetPermit {
                    budget: self,
                    kind,
                };
            }

            notified.await;
        }
    }

    /// Non-blocking variant used by tests and opportunistic dispatch.
    pub fn try_acquire(&self, kind: SlotKind) -> Option<BudgetPermit<'_>> {
        let counter = self.in_flight_counter(kind);
        let current = counter.load(Ordering::SeqCst);
        if current < self.fair_share(kind)
            && counter
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.pool.busy_counter(kind).fetch_add(1, Ordering::SeqCst);
            Some(BudgetPermit {
                budget: self,
                kind,
            })
        } else {
            None
        }
    }
}

impl Drop for RequestBudget {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
        self.pool.changed.notify_waiters();
    }
}

/// Scoped permit; releasing happens on drop on every exit path.
#[derive(Debug)]
pub struct BudgetPermit<'a> {
    budget: &'a RequestBudget,
    kind: SlotKind,
}

impl Drop for BudgetPermit<'_> {
    fn drop(&mut self) {
        self.budget
            .in_flight_counter(self.kind)
            .fetch_sub(1, Ordering::SeqCst);
        self.budget
            .pool
            .busy_counter(self.kind)
            .fetch_sub(1, Ordering::SeqCst);
        self.budget.pool.changed.notify_waiters();
    }
}
