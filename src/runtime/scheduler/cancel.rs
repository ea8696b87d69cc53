//! Cooperative cancellation.
//!
//! A [`CancelToken`] is an atomic flag plus a set of wakers. Blocking
//! primitives (channel operations, `wait`) read the flag on entry and register
//! a waker while they sleep, so `cancel()` can wake them without any
//! preemption of the running thread.
//!
//! Each execution thread has one token installed as its *current* token;
//! blocking primitives find it through [`current`].

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::runtime::errors::{RuntimeError, RuntimeResult};

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Shared cancellation flag with wake-up callbacks.
#[derive(Default)]
pub struct CancelToken {
    canceled: AtomicBool,
    next_waker: AtomicU64,
    wakers: Mutex<Vec<(u64, Waker)>>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

impl CancelToken {
    /// Create a fresh, uncanceled token.
    #[inline]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the flag and wake every registered sleeper.
    ///
    /// Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Wakers take foreign locks; never call them under our own.
        let wakers: Vec<Waker> = self
            .wakers
            .lock()
            .iter()
            .map(|(_, w)| Arc::clone(w))
            .collect();
        trace!("cancel: waking {} sleeper(s)", wakers.len());
        for wake in wakers {
            wake();
        }
        true
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// `Err(Canceled)` once the flag is set.
    #[inline]
    pub fn check(&self) -> RuntimeResult<()> {
        if self.is_canceled() {
            Err(RuntimeError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Register `wake` until the returned guard is dropped.
    ///
    /// A waker must take the lock its sleeper waits under before notifying,
    /// otherwise a cancel racing with the sleeper's flag check is lost.
    pub fn register<F>(
        self: &Arc<Self>,
        wake: F,
    ) -> WakerGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_waker.fetch_add(1, Ordering::Relaxed);
        self.wakers.lock().push((id, Arc::new(wake)));
        WakerGuard {
            token: Arc::clone(self),
            id,
        }
    }
}

/// Unregisters a waker on drop.
pub struct WakerGuard {
    token: Arc<CancelToken>,
    id: u64,
}

impl Drop for WakerGuard {
    fn drop(&mut self) {
        self.token.wakers.lock().retain(|(id, _)| *id != self.id);
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<CancelToken>>> = const { RefCell::new(None) };
}

/// Token of the calling execution thread, if one is installed.
pub fn current() -> Option<Arc<CancelToken>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Install `token` as the calling thread's current token.
///
/// The previous token is restored when the returned guard drops.
pub fn enter(token: Arc<CancelToken>) -> CurrentGuard {
    let previous = CURRENT.with(|c| c.borrow_mut().replace(token));
    CurrentGuard { previous }
}

/// Restores the previously current token on drop.
pub struct CurrentGuard {
    previous: Option<Arc<CancelToken>>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// Entry check every blocking primitive performs.
#[inline]
pub(crate) fn check_current() -> RuntimeResult<()> {
    match current() {
        Some(token) => token.check(),
        None => Ok(()),
    }
}
