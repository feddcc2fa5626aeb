//! Backpressure-aware sequencer
//!
//! A bounded FIFO shared by every producer (poll loop, notification forwarders)
//! and a single consumer. Buffer, reservations, transform hook and end flag live
//! behind one lock, so `push`, `next` and `end` always observe a consistent
//! buffered count and end state.
//!
//! - `admit` runs the transform hook as soon as a reading arrives. A reading
//!   the hook drops never waits for capacity.
//! - `reserve` suspends while buffered + reserved readings reach `capacity`;
//!   the returned [`Permit`] enqueues one admitted reading.
//! - `push` is `admit`, then `reserve`, then [`Permit::send`]. After `end` it
//!   silently discards.
//! - `next` suspends while the buffer is empty and the sequence is live; it
//!   returns `None` once ended and drained.
//! - `end` is idempotent. `abort` additionally drops whatever is buffered.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, Stream};
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::reading::Reading;

/// Transform applied to every reading before it is buffered; `None` drops it
pub type BeforePush = Box<dyn FnMut(Reading) -> Option<Reading> + Send>;

/// What happened to a pushed reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered for delivery
    Queued,
    /// Dropped before buffering (transform hook or undecodable value)
    Filtered,
    /// The sequence had ended; producers should stop
    Discarded,
}

struct State {
    buffer: VecDeque<Reading>,
    reserved: usize,
    ended: bool,
    before_push: Option<BeforePush>,
}

// ----------------------------------------------------------------------------
// Sequencer
// ----------------------------------------------------------------------------

pub struct Sequencer {
    capacity: usize,
    state: Mutex<State>,
    space: Notify,
    items: Notify,
    ended: watch::Sender<bool>,
}

impl Sequencer {
    /// Create a sequencer holding at most `capacity` undelivered readings
    pub fn new(capacity: usize) -> Self {
        Self::with_before_push(capacity, None)
    }

    pub fn with_before_push(capacity: usize, before_push: Option<BeforePush>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(capacity),
                reserved: 0,
                ended: false,
                before_push,
            }),
            space: Notify::new(),
            items: Notify::new(),
            ended,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for room for one reading; `None` once the sequence has ended
    pub async fn reserve(&self) -> Option<Permit<'_>> {
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.lock();
                if state.ended {
                    return None;
                }
                if state.buffer.len() + state.reserved < self.capacity {
                    state.reserved += 1;
                    return Some(Permit {
                        sequencer: self,
                        released: false,
                    });
                }
            }

            space.await;
        }
    }

    /// Run the transform hook on an arriving reading
    ///
    /// `Err` carries `Filtered` when the hook dropped it and `Discarded` once
    /// the sequence has ended.
    pub fn admit(&self, reading: Reading) -> std::result::Result<Reading, PushOutcome> {
        let mut state = self.lock();
        if state.ended {
            return Err(PushOutcome::Discarded);
        }
        let admitted = match state.before_push.as_mut() {
            Some(hook) => hook(reading),
            None => Some(reading),
        };
        admitted.ok_or(PushOutcome::Filtered)
    }

    /// Offer a reading, suspending while the buffer is full
    pub async fn push(&self, reading: Reading) -> PushOutcome {
        let reading = match self.admit(reading) {
            Ok(reading) => reading,
            Err(outcome) => return outcome,
        };
        match self.reserve().await {
            Some(permit) => permit.send(reading),
            None => PushOutcome::Discarded,
        }
    }

    /// Take the oldest reading, suspending while empty; `None` once ended and drained
    pub async fn next(&self) -> Option<Reading> {
        loop {
            let items = self.items.notified();
            tokio::pin!(items);
            items.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(reading) = state.buffer.pop_front() {
                    drop(state);
                    self.space.notify_waiters();
                    return Some(reading);
                }
                if state.ended {
                    return None;
                }
            }

            items.await;
        }
    }

    /// Mark the sequence ended; returns `true` for the call that ended it
    pub fn end(&self) -> bool {
        let first = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.ended, true)
        };
        if first {
            debug!("Sequencer ended with {} readings buffered", self.len());
            self.ended.send_replace(true);
        }
        self.space.notify_waiters();
        self.items.notify_waiters();
        first
    }

    /// End the sequence and drop everything still buffered; returns the number dropped
    pub fn abort(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            state.ended = true;
            let dropped = state.buffer.len();
            state.buffer.clear();
            dropped
        };
        self.ended.send_replace(true);
        self.space.notify_waiters();
        self.items.notify_waiters();
        if dropped > 0 {
            debug!("Sequencer aborted, dropped {} buffered readings", dropped);
        }
        dropped
    }

    /// Resolves once the sequence has ended
    pub async fn closed(&self) {
        let mut ended = self.ended.subscribe();
        let _ = ended.wait_for(|ended| *ended).await;
    }

    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }

    /// Number of undelivered readings
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Sequencer")
            .field("capacity", &self.capacity)
            .field("buffered", &state.buffer.len())
            .field("reserved", &state.reserved)
            .field("ended", &state.ended)
            .field("before_push", &state.before_push.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Reservations
// ----------------------------------------------------------------------------

/// Room for exactly one reading, held until sent or dropped
pub struct Permit<'a> {
    sequencer: &'a Sequencer,
    released: bool,
}

impl Permit<'_> {
    /// Enqueue a reading that already passed [`Sequencer::admit`]
    pub fn send(mut self, reading: Reading) -> PushOutcome {
        self.released = true;
        let sequencer = self.sequencer;

        let mut state = sequencer.lock();
        state.reserved -= 1;
        if state.ended {
            return PushOutcome::Discarded;
        }
        state.buffer.push_back(reading);
        drop(state);
        sequencer.items.notify_one();
        PushOutcome::Queued
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.sequencer.lock().reserved -= 1;
            self.sequencer.space.notify_waiters();
        }
    }
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("released", &self.released)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Consumer Handle
// ----------------------------------------------------------------------------

/// Consumer side of a reading stream
///
/// Dropping it ends the sequence, which stops the producers.
#[derive(Debug)]
pub struct Readings {
    sequencer: Arc<Sequencer>,
}

impl Readings {
    pub(crate) fn new(sequencer: Arc<Sequencer>) -> Self {
        Self { sequencer }
    }

    /// Next reading in arrival order; `None` at end of stream
    pub async fn next(&mut self) -> Option<Reading> {
        self.sequencer.next().await
    }

    /// Number of readings buffered and not yet delivered
    pub fn len(&self) -> usize {
        self.sequencer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequencer.is_empty()
    }

    /// Consume as a [`futures::Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Reading> + Send + 'static {
        stream::unfold(self, |mut readings| async move {
            let reading = readings.next().await?;
            Some((reading, readings))
        })
    }
}

impl Drop for Readings {
    fn drop(&mut self) {
        self.sequencer.end();
    }
}
