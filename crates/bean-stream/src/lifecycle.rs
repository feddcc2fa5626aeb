//! Lifecycle controller
//!
//! [`BeanStream`] owns one stream from start to its single terminal event:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Ending -> Ended
//! ```
//!
//! Teardown starts on `stop()`, on a reported disconnect, when the poll
//! failure tolerance is exceeded, or when the consumer drops its
//! [`Readings`]. Graceful teardown ends the sequencer (buffered readings stay
//! deliverable), waits for the producers, unsubscribes and disconnects at most
//! once. A `stop()` arriving while teardown is in progress forces it: buffered
//! readings are dropped and producers are aborted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::device::{BeanDevice, CommandGate, LinkState};
use crate::errors::{Result, StreamError};
use crate::events::{create_event_channel, publish, EndCause, EventReceiver, EventSender, StreamEvent};
use crate::multiplexer;
use crate::pipeline::Pipeline;
use crate::reading::{Reading, ReadingKind};
use crate::scheduler::{PollExit, PollScheduler};
use crate::sequencer::{BeforePush, Readings, Sequencer};

// ----------------------------------------------------------------------------
// States
// ----------------------------------------------------------------------------

/// Lifecycle state of a [`BeanStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Ending,
    Ended,
}

/// Result of a [`BeanStream::stop`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This call ended the stream gracefully
    Graceful,
    /// Teardown was already in progress and has been forced
    Forced,
    /// The stream had already ended; nothing happened
    AlreadyEnded,
}

/// What a terminal trigger did
enum Teardown {
    Started,
    InProgress,
    AlreadyEnded,
}

#[derive(Default)]
struct Running {
    sequencer: Option<Arc<Sequencer>>,
    subscribed: Vec<ReadingKind>,
    producers: Vec<JoinHandle<()>>,
    aborts: Vec<AbortHandle>,
    /// Cause of a teardown requested before start() finished arming
    pending: Option<EndCause>,
}

// ----------------------------------------------------------------------------
// Shared Controller State
// ----------------------------------------------------------------------------

struct Inner {
    config: StreamConfig,
    gate: CommandGate,
    device_id: String,
    events: EventSender,
    before_push: Mutex<Option<BeforePush>>,
    /// Guards every state transition
    running: Mutex<Running>,
    state: watch::Sender<StreamState>,
    disconnected: AtomicBool,
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    fn set_state(&self, state: StreamState) {
        debug!("{}: {:?} -> {:?}", self.device_id, self.state(), state);
        self.state.send_replace(state);
    }

    /// Handle a terminal trigger; only the first one starts teardown
    fn begin(self: &Arc<Self>, cause: EndCause) -> Teardown {
        let mut running = self.running();
        match self.state() {
            StreamState::Idle => {
                self.set_state(StreamState::Ended);
                drop(running);
                publish(&self.events, StreamEvent::Ended { cause });
                Teardown::Started
            }
            StreamState::Connecting => {
                // start() picks this up once connect returns
                running.pending = Some(cause);
                self.set_state(StreamState::Ending);
                Teardown::Started
            }
            StreamState::Streaming => {
                self.set_state(StreamState::Ending);
                self.spawn_teardown(&mut running, cause);
                Teardown::Started
            }
            StreamState::Ending => Teardown::InProgress,
            StreamState::Ended => Teardown::AlreadyEnded,
        }
    }

    fn spawn_teardown(self: &Arc<Self>, running: &mut Running, cause: EndCause) {
        info!("{}: ending stream ({:?})", self.device_id, cause);
        let handle = tokio::spawn(self.clone().teardown(cause));
        running.aborts.push(handle.abort_handle());
    }

    async fn teardown(self: Arc<Self>, cause: EndCause) {
        let (sequencer, subscribed, producers) = {
            let mut running = self.running();
            (
                running.sequencer.clone(),
                std::mem::take(&mut running.subscribed),
                std::mem::take(&mut running.producers),
            )
        };

        if let Some(sequencer) = &sequencer {
            sequencer.end();
        }

        // An in-flight read completes; its reading is discarded
        for producer in producers {
            let _ = producer.await;
        }

        for source in subscribed {
            if let Err(error) = self.gate.unsubscribe(source).await {
                warn!("{}: failed to unsubscribe from {}: {}", self.device_id, source, error);
            }
        }

        if matches!(cause, EndCause::Stopped | EndCause::Disconnected) {
            self.disconnect_once().await;
        }

        self.finish(cause);
    }

    /// Invoke the facade's disconnect at most once per stream
    async fn disconnect_once(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disconnecting from {}", self.device_id);
        if let Err(error) = self.gate.disconnect().await {
            warn!("{}: disconnect failed: {}", self.device_id, error);
        }
    }

    /// Ending -> Ended; only the first caller publishes the terminal event
    fn finish(&self, cause: EndCause) -> bool {
        {
            let _running = self.running();
            if self.state() != StreamState::Ending {
                return false;
            }
            self.set_state(StreamState::Ended);
        }
        info!("{}: stream ended ({:?})", self.device_id, cause);
        publish(&self.events, StreamEvent::Ended { cause });
        true
    }

    /// Drop buffered readings, abort every task and end immediately
    fn force(&self) {
        let (sequencer, aborts) = {
            let mut running = self.running();
            (running.sequencer.clone(), std::mem::take(&mut running.aborts))
        };

        if let Some(sequencer) = sequencer {
            let dropped = sequencer.abort();
            if dropped > 0 {
                warn!("{}: dropped {} buffered readings", self.device_id, dropped);
            }
        }
        for task in aborts {
            task.abort();
        }
        self.finish(EndCause::Forced);
    }

    async fn ended(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|state| *state == StreamState::Ended).await;
    }

    /// Failed connect: Connecting (or Ending, if stopped meanwhile) -> Ended
    fn fail_start(&self) {
        {
            let _running = self.running();
            if !matches!(self.state(), StreamState::Connecting | StreamState::Ending) {
                return;
            }
            self.set_state(StreamState::Ended);
        }
        publish(&self.events, StreamEvent::Ended { cause: EndCause::Failed });
    }
}

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

async fn run_poll(inner: Arc<Inner>, scheduler: PollScheduler) {
    if scheduler.run().await == PollExit::FailureLimit {
        error!("{}: poll failure tolerance exceeded", inner.device_id);
        inner.begin(EndCause::Failed);
    }
}

/// Turn a reported disconnect or a dropped consumer into a terminal trigger
async fn watch_link(
    inner: Arc<Inner>,
    sequencer: Arc<Sequencer>,
    mut link: watch::Receiver<LinkState>,
) {
    let link_lost = async move {
        link.wait_for(|state| *state == LinkState::Disconnected)
            .await
            .is_ok()
    };

    let cause = tokio::select! {
        lost = link_lost => if lost {
            EndCause::Disconnected
        } else {
            debug!("{}: link state no longer reported", inner.device_id);
            sequencer.closed().await;
            EndCause::Stopped
        },
        _ = sequencer.closed() => EndCause::Stopped,
    };

    if cause == EndCause::Disconnected {
        info!("{} disconnected", inner.device_id);
    }
    inner.begin(cause);
}

// ----------------------------------------------------------------------------
// Controller Handle
// ----------------------------------------------------------------------------

/// Controller for one reading stream over one device
///
/// Cloning yields another handle to the same stream, so `stop()` can be
/// called from a signal handler while another task consumes readings.
#[derive(Clone)]
pub struct BeanStream {
    inner: Arc<Inner>,
}

impl BeanStream {
    /// Create an idle stream; nothing touches the device until `start()`
    pub fn new(device: Arc<dyn BeanDevice>, config: StreamConfig) -> Self {
        let (events, _) = create_event_channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(StreamState::Idle);
        let device_id = device.id();

        Self {
            inner: Arc::new(Inner {
                config,
                gate: CommandGate::new(device),
                device_id,
                events,
                before_push: Mutex::new(None),
                running: Mutex::new(Running::default()),
                state,
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    /// Transform applied to every reading before buffering; `None` drops it
    pub fn with_before_push<F>(self, hook: F) -> Self
    where
        F: FnMut(Reading) -> Option<Reading> + Send + 'static,
    {
        *self
            .inner
            .before_push
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn state(&self) -> StreamState {
        self.inner.state()
    }

    /// Receive [`StreamEvent`]s published from now on
    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Connect, arm the poll scheduler and notification multiplexer, and
    /// hand back the consumer side of the stream
    pub async fn start(&self) -> Result<Readings> {
        let inner = &self.inner;
        inner.config.validate()?;

        {
            let _running = inner.running();
            let state = inner.state();
            if state != StreamState::Idle {
                return Err(StreamError::InvalidState {
                    operation: "start",
                    state,
                });
            }
            inner.set_state(StreamState::Connecting);
        }

        info!("Connecting to {}", inner.device_id);
        if let Err(error) = inner.gate.connect().await {
            error!("Failed to connect to {}: {}", inner.device_id, error);
            inner.fail_start();
            return Err(error.into());
        }

        let before_push = inner
            .before_push
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let sequencer = Arc::new(Sequencer::with_before_push(inner.config.capacity, before_push));
        let pipeline = Pipeline::new(inner.device_id.as_str(), sequencer.clone(), inner.events.clone());

        let armed = multiplexer::arm(&inner.gate, &pipeline, &inner.config.notify_targets).await;
        let mut producers = armed.tasks;

        if let Some(interval) = inner.config.poll_interval.filter(|_| inner.config.polls()) {
            let scheduler = PollScheduler::new(
                inner.gate.clone(),
                pipeline,
                inner.config.poll_targets.clone(),
                interval,
                inner.config.max_consecutive_failures,
            );
            producers.push(tokio::spawn(run_poll(inner.clone(), scheduler)));
        }

        let watcher = tokio::spawn(watch_link(
            inner.clone(),
            sequencer.clone(),
            inner.gate.link_state(),
        ));

        let readings = Readings::new(sequencer.clone());

        let (state, forced) = {
            let mut running = inner.running();
            running.aborts = producers
                .iter()
                .map(JoinHandle::abort_handle)
                .chain(std::iter::once(watcher.abort_handle()))
                .collect();
            running.producers = producers;
            running.subscribed = armed.subscribed;
            running.sequencer = Some(sequencer.clone());

            let state = inner.state();
            match state {
                StreamState::Connecting => {
                    inner.set_state(StreamState::Streaming);
                    info!(
                        "Streaming from {} ({} poll, {} notify targets)",
                        inner.device_id,
                        inner.config.poll_targets.len(),
                        inner.config.notify_targets.len()
                    );
                    return Ok(readings);
                }
                StreamState::Ending => {
                    let cause = running.pending.take().unwrap_or(EndCause::Stopped);
                    inner.spawn_teardown(&mut running, cause);
                    (state, false)
                }
                _ => {
                    // Forced while connecting
                    sequencer.abort();
                    for task in running.aborts.drain(..) {
                        task.abort();
                    }
                    (state, true)
                }
            }
        };

        if forced {
            let subscribed = std::mem::take(&mut inner.running().subscribed);
            for source in subscribed {
                if let Err(error) = inner.gate.unsubscribe(source).await {
                    warn!("{}: failed to unsubscribe from {}: {}", inner.device_id, source, error);
                }
            }
            inner.disconnect_once().await;
        }

        Err(StreamError::InvalidState {
            operation: "start",
            state,
        })
    }

    /// Request the end of the stream
    ///
    /// The first call tears down gracefully and resolves once the stream has
    /// ended. A call made while that teardown is still running forces it.
    pub async fn stop(&self) -> StopOutcome {
        match self.inner.begin(EndCause::Stopped) {
            Teardown::Started => {
                self.inner.ended().await;
                StopOutcome::Graceful
            }
            Teardown::InProgress => {
                warn!("{}: stop requested during teardown, forcing", self.inner.device_id);
                self.inner.force();
                StopOutcome::Forced
            }
            Teardown::AlreadyEnded => StopOutcome::AlreadyEnded,
        }
    }

    /// Resolves once the stream has reached [`StreamState::Ended`]
    pub async fn ended(&self) {
        self.inner.ended().await;
    }
}

impl std::fmt::Debug for BeanStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanStream")
            .field("device", &self.inner.device_id)
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}
