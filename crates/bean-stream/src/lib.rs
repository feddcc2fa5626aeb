//! Bean Reading Stream
//!
//! Turns a Bean board's periodic poll responses and asynchronous notifications
//! into one ordered, backpressure-aware sequence of typed readings.
//!
//! A [`BeanStream`] drives a [`BeanDevice`] facade: the poll scheduler reads
//! the configured characteristics at a fixed interval, the notification
//! multiplexer forwards subscribed sources, and both push normalized
//! [`Reading`]s into a bounded sequencer drained through [`Readings`]. A slow
//! consumer suspends the producers instead of growing the buffer.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod device;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod normalizer;
pub mod reading;
pub mod sequencer;
pub mod transforms;

mod multiplexer;
mod pipeline;
mod scheduler;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{StreamConfig, StreamOptions, DEFAULT_EVENT_CAPACITY, DEFAULT_HIGH_WATER_MARK};
pub use device::{BeanDevice, CommandGate, DeviceResult, FlowControl, LinkState, Subscription};
pub use errors::{DecodeError, DeviceError, Result, StreamError};
pub use events::{EndCause, EventReceiver, StreamEvent};
pub use lifecycle::{BeanStream, StopOutcome, StreamState};
pub use reading::{Payload, Reading, ReadingKind, ScratchValue, Timestamp, Vector3};
pub use sequencer::{BeforePush, PushOutcome, Readings, Sequencer};
pub use transforms::{stamp_captured_at, Coalescer, Row};

#[cfg(any(test, feature = "testing"))]
pub use mock::{DeviceCall, MockBean};
