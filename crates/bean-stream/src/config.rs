//! Stream configuration
//!
//! [`StreamOptions`] mirrors the recognized option keys callers hand in (and
//! what the CLI reads from TOML); [`StreamConfig`] is the validated, immutable
//! form a stream is started with.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StreamError};
use crate::normalizer::SCRATCH_BANKS;
use crate::reading::ReadingKind;

/// Default buffer capacity, matching common stream defaults
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Default capacity of the observable event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

// ----------------------------------------------------------------------------
// Raw Options
// ----------------------------------------------------------------------------

/// Recognized stream options, as supplied by the caller
///
/// Unknown keys are rejected when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct StreamOptions {
    /// Buffer capacity (default 16)
    pub high_water_mark: Option<usize>,
    /// Poll interval in milliseconds; absent disables polling
    pub poll: Option<u64>,
    pub poll_accell: bool,
    pub poll_batt: bool,
    pub poll_temp: bool,
    /// Comma-separated scratch bank numbers, e.g. `"1,2"`
    pub poll_scratch: Option<String>,
    pub listen_serial: bool,
    /// Comma-separated scratch bank numbers, e.g. `"1,2,3"`
    pub notify_scratch: Option<String>,
    /// Consecutive failed poll reads tolerated before the stream aborts
    pub max_consecutive_failures: Option<u32>,
}

// ----------------------------------------------------------------------------
// Validated Configuration
// ----------------------------------------------------------------------------

/// Validated stream configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Poll interval; `None` disables polling
    pub poll_interval: Option<Duration>,
    /// Characteristics read every poll interval, in read order
    pub poll_targets: Vec<ReadingKind>,
    /// Characteristics subscribed to for notifications
    pub notify_targets: Vec<ReadingKind>,
    /// Maximum number of undelivered readings
    pub capacity: usize,
    /// Consecutive failed poll reads tolerated before the stream aborts
    pub max_consecutive_failures: Option<u32>,
    /// Capacity of the observable event channel
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: None,
            poll_targets: Vec::new(),
            notify_targets: Vec::new(),
            capacity: DEFAULT_HIGH_WATER_MARK,
            max_consecutive_failures: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl StreamConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a set of recognized options
    pub fn from_options(options: &StreamOptions) -> Result<Self> {
        let mut poll_targets = Vec::new();
        if options.poll_accell {
            poll_targets.push(ReadingKind::Accelerometer);
        }
        if options.poll_batt {
            poll_targets.push(ReadingKind::Battery);
        }
        if options.poll_temp {
            poll_targets.push(ReadingKind::Temperature);
        }
        if let Some(list) = &options.poll_scratch {
            poll_targets.extend(parse_scratch_list("pollScratch", list)?);
        }

        let mut notify_targets = Vec::new();
        if options.listen_serial {
            notify_targets.push(ReadingKind::Serial);
        }
        if let Some(list) = &options.notify_scratch {
            notify_targets.extend(parse_scratch_list("notifyScratch", list)?);
        }

        let poll_interval = match options.poll {
            Some(0) => return Err(StreamError::invalid_config("poll interval must be > 0 ms")),
            Some(millis) => Some(Duration::from_millis(millis)),
            None => None,
        };

        let config = Self {
            poll_interval,
            poll_targets,
            notify_targets,
            capacity: options.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK),
            max_consecutive_failures: options.max_consecutive_failures,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Add a poll target
    pub fn with_poll_target(mut self, kind: ReadingKind) -> Self {
        self.poll_targets.push(kind);
        self
    }

    /// Add a notification target
    pub fn with_notify_target(mut self, kind: ReadingKind) -> Self {
        self.notify_targets.push(kind);
        self
    }

    /// Set buffer capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Abort the stream after this many consecutive failed poll reads
    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = Some(failures);
        self
    }

    /// Set event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Whether the poll scheduler has anything to do
    pub fn polls(&self) -> bool {
        self.poll_interval.is_some() && !self.poll_targets.is_empty()
    }

    /// Check invariants; called again by `start()`
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(StreamError::invalid_config("highWaterMark must be >= 1"));
        }
        if self.event_capacity == 0 {
            return Err(StreamError::invalid_config("event capacity must be >= 1"));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(StreamError::invalid_config(
                "failure tolerance must be >= 1 when set",
            ));
        }
        if self.poll_interval == Some(Duration::ZERO) {
            return Err(StreamError::invalid_config("poll interval must be > 0"));
        }
        if !self.poll_targets.is_empty() && self.poll_interval.is_none() {
            return Err(StreamError::invalid_config(
                "poll targets configured without a poll interval",
            ));
        }

        check_targets("poll", &self.poll_targets, |kind| {
            !matches!(kind, ReadingKind::Serial | ReadingKind::Merged)
        })?;
        check_targets("notify", &self.notify_targets, |kind| {
            matches!(kind, ReadingKind::Serial | ReadingKind::Scratch(_))
        })?;

        if !self.polls() && self.notify_targets.is_empty() {
            return Err(StreamError::invalid_config(
                "neither poll nor notification targets configured",
            ));
        }
        Ok(())
    }
}

fn check_targets(
    role: &str,
    targets: &[ReadingKind],
    allowed: impl Fn(&ReadingKind) -> bool,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for kind in targets {
        if !allowed(kind) {
            return Err(StreamError::invalid_config(format!(
                "{} cannot be a {} target",
                kind, role
            )));
        }
        if let ReadingKind::Scratch(index) = kind {
            if *index == 0 || *index > SCRATCH_BANKS {
                return Err(StreamError::invalid_config(format!(
                    "scratch bank {} out of range 1..={}",
                    index, SCRATCH_BANKS
                )));
            }
        }
        if !seen.insert(*kind) {
            return Err(StreamError::invalid_config(format!(
                "{} listed twice as a {} target",
                kind, role
            )));
        }
    }
    Ok(())
}

/// Parse `"1, 2,3"` into ascending, de-duplicated scratch kinds
fn parse_scratch_list(option: &str, list: &str) -> Result<Vec<ReadingKind>> {
    let mut banks = BTreeSet::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let index: u8 = item.parse().map_err(|_| {
            StreamError::invalid_config(format!("{}: `{}` is not a scratch number", option, item))
        })?;
        if index == 0 || index > SCRATCH_BANKS {
            return Err(StreamError::invalid_config(format!(
                "{}: scratch bank {} out of range 1..={}",
                option, index, SCRATCH_BANKS
            )));
        }
        banks.insert(index);
    }
    Ok(banks.into_iter().map(ReadingKind::Scratch).collect())
}
