//! Channels for message passing between tasks.
//!
//! Capacity 0 is a rendezvous: `send` completes only when a receiver takes
//! the value from the sender's hand. Capacity `n` buffers up to `n` values.
//!
//! Each channel guards its state with its own lock; there is no global lock
//! across channels. Waiters are woken with `notify_all`, so ordering between
//! competing senders (or receivers) is first-ready-first-served, not FIFO.
//!
//! All blocking operations observe the calling thread's cancellation token.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::runtime::errors::{RuntimeError, RuntimeResult};
use crate::runtime::scheduler::cancel::{self, CancelToken, WakerGuard};
use crate::runtime::value::Value;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);

/// Result of a receive: a value, or the done signal of a drained closed channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Recv {
    pub value: Value,
    pub done: bool,
}

impl Recv {
    fn item(value: Value) -> Self {
        Self { value, done: false }
    }

    fn closed() -> Self {
        Self {
            value: Value::Null,
            done: true,
        }
    }

    /// The language-level `[value, done]` pair.
    pub fn into_pair(self) -> Value {
        Value::list(vec![self.value, Value::Bool(self.done)])
    }
}

/// Outcome of [`Channel::try_send`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrySend {
    Sent,
    /// No room (or no receiver ready); the value is handed back.
    Full(Value),
}

#[derive(Default)]
struct ChannelState {
    buffer: VecDeque<Value>,
    closed: bool,
    /// Receivers currently blocked in a rendezvous `recv`.
    receivers_waiting: usize,
    /// Value held out by a rendezvous sender, tagged with its ticket.
    offer: Option<(u64, Value)>,
    next_ticket: u64,
}

struct Shared {
    id: u64,
    capacity: usize,
    state: Mutex<ChannelState>,
    cond: Condvar,
}

/// A rendezvous or bounded-buffer channel.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl fmt::Debug for Channel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("capacity", &self.shared.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    /// Create a channel with the given capacity; 0 means rendezvous.
    pub fn with_capacity(capacity: usize) -> Self {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        trace!("channel {} created (capacity {})", id, capacity);
        Self {
            shared: Arc::new(Shared {
                id,
                capacity,
                state: Mutex::new(ChannelState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// `channel()` / `rendezvous()`.
    #[inline]
    pub fn rendezvous() -> Self {
        Self::with_capacity(0)
    }

    /// `buffered(n)`.
    #[inline]
    pub fn buffered(capacity: usize) -> Self {
        Self::with_capacity(capacity)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    #[inline]
    pub fn is_rendezvous(&self) -> bool {
        self.shared.capacity == 0
    }

    /// Number of buffered values (always 0 for a rendezvous channel).
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Identity comparison.
    #[inline]
    pub fn same_channel(
        &self,
        other: &Channel,
    ) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Close the channel. Idempotent; returns `true` on the first call.
    ///
    /// Buffered values remain receivable until drained.
    pub fn done(&self) -> bool {
        let mut st = self.shared.state.lock();
        if st.closed {
            return false;
        }
        st.closed = true;
        self.shared.cond.notify_all();
        debug!("channel {} closed ({} buffered)", self.shared.id, st.buffer.len());
        true
    }

    /// Send `value`, blocking per the channel's capacity.
    ///
    /// Fails fatally with `SendOnClosed` once the channel is closed, including
    /// for a sender blocked at the moment of closing.
    pub fn send(
        &self,
        value: Value,
    ) -> RuntimeResult<()> {
        cancel::check_current()?;
        let token = cancel::current();
        let _waker = self.register_waker(token.as_ref());
        if self.is_rendezvous() {
            self.send_rendezvous(value, token.as_deref())
        } else {
            self.send_buffered(value, token.as_deref())
        }
    }

    /// Receive a value, blocking until one is available or the channel is
    /// closed and drained (then `done` is set and the value is null).
    pub fn recv(&self) -> RuntimeResult<Recv> {
        cancel::check_current()?;
        let token = cancel::current();
        let _waker = self.register_waker(token.as_ref());
        let mut st = self.shared.state.lock();
        loop {
            if let Some(value) = st.buffer.pop_front() {
                self.shared.cond.notify_all();
                return Ok(Recv::item(value));
            }
            if let Some((_, value)) = st.offer.take() {
                self.shared.cond.notify_all();
                return Ok(Recv::item(value));
            }
            if st.closed {
                return Ok(Recv::closed());
            }
            check(token.as_deref())?;
            st.receivers_waiting += 1;
            self.shared.cond.notify_all();
            self.shared.cond.wait(&mut st);
            st.receivers_waiting -= 1;
        }
    }

    /// `ch.recv()` as the language sees it: the `[value, done]` list.
    pub fn recv_value(&self) -> RuntimeResult<Value> {
        self.recv().map(Recv::into_pair)
    }

    /// Send without waiting for room.
    ///
    /// On a rendezvous channel this succeeds only when a receiver is already
    /// blocked in `recv`, and then completes the hand-off.
    pub fn try_send(
        &self,
        value: Value,
    ) -> RuntimeResult<TrySend> {
        cancel::check_current()?;
        {
            let mut st = self.shared.state.lock();
            if st.closed {
                return Err(RuntimeError::SendOnClosed);
            }
            if !self.is_rendezvous() {
                if st.buffer.len() < self.shared.capacity {
                    st.buffer.push_back(value);
                    self.shared.cond.notify_all();
                    return Ok(TrySend::Sent);
                }
                return Ok(TrySend::Full(value));
            }
            if st.receivers_waiting == 0 || st.offer.is_some() {
                return Ok(TrySend::Full(value));
            }
        }
        self.send(value).map(|()| TrySend::Sent)
    }

    /// Receive without blocking; `None` when nothing is ready.
    pub fn try_recv(&self) -> Option<Recv> {
        let mut st = self.shared.state.lock();
        if let Some(value) = st.buffer.pop_front() {
            self.shared.cond.notify_all();
            return Some(Recv::item(value));
        }
        if let Some((_, value)) = st.offer.take() {
            self.shared.cond.notify_all();
            return Some(Recv::item(value));
        }
        if st.closed {
            return Some(Recv::closed());
        }
        None
    }

    fn send_buffered(
        &self,
        value: Value,
        token: Option<&CancelToken>,
    ) -> RuntimeResult<()> {
        let mut st = self.shared.state.lock();
        loop {
            if st.closed {
                return Err(RuntimeError::SendOnClosed);
            }
            check(token)?;
            if st.buffer.len() < self.shared.capacity {
                st.buffer.push_back(value);
                self.shared.cond.notify_all();
                return Ok(());
            }
            self.shared.cond.wait(&mut st);
        }
    }

    fn send_rendezvous(
        &self,
        value: Value,
        token: Option<&CancelToken>,
    ) -> RuntimeResult<()> {
        let mut st = self.shared.state.lock();

        // Wait for a ready receiver and a free hand-off slot.
        loop {
            if st.closed {
                return Err(RuntimeError::SendOnClosed);
            }
            check(token)?;
            if st.offer.is_none() && st.receivers_waiting > 0 {
                break;
            }
            self.shared.cond.wait(&mut st);
        }

        let ticket = st.next_ticket;
        st.next_ticket += 1;
        st.offer = Some((ticket, value));
        self.shared.cond.notify_all();

        // Hold until a receiver takes it.
        loop {
            let still_ours = matches!(&st.offer, Some((t, _)) if *t == ticket);
            if !still_ours {
                return Ok(());
            }
            let abort = if st.closed {
                Some(RuntimeError::SendOnClosed)
            } else {
                check(token).err()
            };
            if let Some(error) = abort {
                st.offer = None;
                self.shared.cond.notify_all();
                return Err(error);
            }
            self.shared.cond.wait(&mut st);
        }
    }

    /// Register a waker on the caller's token; must run before taking the lock.
    fn register_waker(
        &self,
        token: Option<&Arc<CancelToken>>,
    ) -> Option<WakerGuard> {
        token.map(|t| {
            let shared = Arc::clone(&self.shared);
            t.register(move || {
                let _st = shared.state.lock();
                shared.cond.notify_all();
            })
        })
    }
}

#[inline]
fn check(token: Option<&CancelToken>) -> RuntimeResult<()> {
    match token {
        Some(t) => t.check(),
        None => Ok(()),
    }
}
