//! A non-reentrant async mutex that hands the lock to waiters in FIFO order.
//!
//! Unlike tokio's Mutex it guards no data: it serializes build sessions
//! against each other and against registry mutation.  Release passes the lock
//! straight to the next waiter, so it never reads as unlocked while anyone is
//! queued.  Acquiring again while holding the lock deadlocks.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Default)]
struct State {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

#[derive(Default)]
pub struct AsyncMutex {
    state: Mutex<State>,
}

impl AsyncMutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Take the lock if it is free, without waiting.
    pub fn try_acquire(&self) -> Option<LockGuard<'_>> {
        let mut state = self.state();
        if state.locked {
            return None;
        }
        state.locked = true;
        Some(LockGuard::new(self))
    }

    /// Wait for the lock, queueing behind earlier waiters.
    pub async fn acquire(&self) -> LockGuard<'_> {
        let rx = {
            let mut state = self.state();
            if !state.locked {
                state.locked = true;
                return LockGuard::new(self);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut waiter = Waiter {
            mutex: self,
            rx: Some(rx),
        };
        waiter.wait().await;
        LockGuard::new(self)
    }

    fn release(&self) {
        let mut state = self.state();
        while let Some(tx) = state.waiters.pop_front() {
            // Fails only if that waiter was cancelled; try the next one.
            if tx.send(()).is_ok() {
                return;
            }
        }
        state.locked = false;
    }
}

/// A queued `acquire()`.  If it is dropped after the lock was handed to it,
/// the lock is passed on.
struct Waiter<'a> {
    mutex: &'a AsyncMutex,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // Senders live in the mutex, which outlives this borrow, and are
            // only consumed by a send; the result is always Ok.
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.mutex.release();
            }
        }
    }
}

/// Proof of holding an `AsyncMutex`.  Released on drop or by `release()`.
pub struct LockGuard<'a> {
    mutex: &'a AsyncMutex,
    held: bool,
}

impl<'a> LockGuard<'a> {
    fn new(mutex: &'a AsyncMutex) -> Self {
        LockGuard { mutex, held: true }
    }

    /// Release the lock; later calls do nothing.
    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.mutex.release();
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
