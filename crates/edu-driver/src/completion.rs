// SPDX-License-Identifier: AGPL-3.0-only

//! Asynchronous factorial completion
//!
//! The device reports a factorial result only through its interrupt. Arming
//! a computation returns a [`FactorialHandle`]; the interrupt bridge resolves
//! it exactly once. The handle is a [`Future`], and [`FactorialHandle::wait`]
//! is a blocking adapter on top.
//!
//! The in-flight flag is per device. The interrupt side never blocks: it
//! swaps an `Option` under a mutex that no caller holds across a wait.

use crate::error::{EduError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

const PENDING: u64 = 0;
const DONE: u64 = 1 << 32;
const ABANDONED: u64 = 1 << 33;

/// Shared cell between one handle and the interrupt bridge
#[derive(Debug, Default)]
pub(crate) struct Completion {
    state: AtomicU64,
    waker: Mutex<Option<Waker>>,
    cond: Condvar,
}

impl Completion {
    fn settle(&self, state: u64) -> bool {
        if self
            .state
            .compare_exchange(PENDING, state, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // Taking the lock orders this wake-up after any waiter's check.
        let waker = self
            .waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.cond.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Publish `value`. Returns `false` if already settled.
    pub(crate) fn resolve(&self, value: u32) -> bool {
        self.settle(DONE | u64::from(value))
    }

    /// Settle without a value; waiters get `NotReady`.
    pub(crate) fn abandon(&self) -> bool {
        self.settle(ABANDONED)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn poll_state(&self) -> Option<Result<u32>> {
        let state = self.state.load(Ordering::Acquire);
        if state & DONE != 0 {
            Some(Ok(state as u32))
        } else if state & ABANDONED != 0 {
            Some(Err(EduError::NotReady))
        } else {
            None
        }
    }
}

/// Per-device factorial state: the in-flight flag and the pending completion
#[derive(Debug, Default)]
pub(crate) struct FactorialSlot {
    in_flight: AtomicBool,
    pending: Mutex<Option<Arc<Completion>>>,
    completed: AtomicU64,
}

impl FactorialSlot {
    /// Claim the slot for a new computation.
    ///
    /// # Errors
    ///
    /// `Busy` if a computation is already in flight on this device.
    pub(crate) fn claim(&self) -> Result<Arc<Completion>> {
        // Held across the flag flip so `finish` never sees the flag without the handle.
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EduError::busy("factorial already in flight"));
        }
        let completion = Arc::new(Completion::default());
        *pending = Some(completion.clone());
        Ok(completion)
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Deliver `value` to the pending handle and clear the flag.
    pub(crate) fn finish(&self, value: u32) {
        let completion = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            self.completed.store(DONE | u64::from(value), Ordering::Release);
            self.in_flight.store(false, Ordering::Release);
            pending.take()
        };
        if let Some(completion) = completion {
            completion.resolve(value);
        }
    }

    /// Abandon any pending handle; used when the device goes away.
    pub(crate) fn abandon(&self) {
        let completion = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            self.in_flight.store(false, Ordering::Release);
            pending.take()
        };
        if let Some(completion) = completion {
            completion.abandon();
        }
    }

    /// Most recent result delivered by the bridge, if any.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn last_result(&self) -> Option<u32> {
        let state = self.completed.load(Ordering::Acquire);
        (state & DONE != 0).then_some(state as u32)
    }
}

/// Pending factorial result
///
/// Dropping the handle does not cancel the computation; the bridge still
/// completes it and the device accepts a new one afterwards.
///
/// The slot is claimed before the operand reaches the device. A software
/// interrupt serviced in that window whose status has the `FACTORIAL_DONE`
/// bit set is indistinguishable from a completion, and resolves the handle
/// with the previous `FACTORIAL` register value.
#[derive(Debug)]
#[must_use = "the result is only observable through the handle"]
pub struct FactorialHandle {
    operand: u32,
    inner: Arc<Completion>,
}

impl FactorialHandle {
    pub(crate) const fn new(operand: u32, inner: Arc<Completion>) -> Self {
        Self { operand, inner }
    }

    /// Operand written to the device
    pub const fn operand(&self) -> u32 {
        self.operand
    }

    /// Result if the bridge has delivered it.
    pub fn try_result(&self) -> Option<Result<u32>> {
        self.inner.poll_state()
    }

    /// Whether the handle has settled.
    pub fn is_complete(&self) -> bool {
        self.try_result().is_some()
    }

    /// Block until the bridge delivers the result.
    ///
    /// # Errors
    ///
    /// `NotReady` if the device was unbound before completing.
    pub fn wait(&self) -> Result<u32> {
        let mut guard = self.inner.waker.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = self.inner.poll_state() {
                return result;
            }
            guard = self
                .inner
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`.
    ///
    /// # Errors
    ///
    /// `Timeout` if nothing arrives in time, `NotReady` if the device was unbound.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<u32> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.waker.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = self.inner.poll_state() {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(EduError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            guard = self
                .inner
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Future for FactorialHandle {
    type Output = Result<u32>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.inner.poll_state() {
            return Poll::Ready(result);
        }
        let mut slot = self.inner.waker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(result) = self.inner.poll_state() {
            return Poll::Ready(result);
        }
        *slot = Some(cx.waker().clone());
        Poll::Pending
    }
}
