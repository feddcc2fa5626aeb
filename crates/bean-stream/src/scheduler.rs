//! Poll scheduler
//!
//! Reads every poll target once per interval, one read at a time, in the
//! configured order. A full sequencer suspends the cycle; ticks missed while
//! suspended are skipped rather than replayed.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::device::CommandGate;
use crate::events::StreamEvent;
use crate::pipeline::Pipeline;
use crate::reading::{ReadingKind, Timestamp};
use crate::sequencer::PushOutcome;

/// Why the poll loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollExit {
    /// The sequence ended; nothing more will be accepted
    Ended,
    /// The configured number of consecutive read failures was reached
    FailureLimit,
}

pub(crate) struct PollScheduler {
    gate: CommandGate,
    pipeline: Pipeline,
    targets: Vec<ReadingKind>,
    interval: Duration,
    max_consecutive_failures: Option<u32>,
}

impl PollScheduler {
    pub fn new(
        gate: CommandGate,
        pipeline: Pipeline,
        targets: Vec<ReadingKind>,
        interval: Duration,
        max_consecutive_failures: Option<u32>,
    ) -> Self {
        Self {
            gate,
            pipeline,
            targets,
            interval,
            max_consecutive_failures,
        }
    }

    /// Run until the sequence ends or the failure tolerance is exceeded
    pub async fn run(self) -> PollExit {
        debug!(
            "Polling {:?} every {:?}",
            self.targets, self.interval
        );

        // First poll one full interval after start
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.pipeline.sequencer().closed() => return PollExit::Ended,
            }

            for &target in &self.targets {
                if self.pipeline.sequencer().is_ended() {
                    return PollExit::Ended;
                }

                match self.gate.read(target).await {
                    Ok(raw) => {
                        let captured_at = Timestamp::now();
                        consecutive_failures = 0;
                        if self.pipeline.deliver(target, &raw, captured_at).await
                            == PushOutcome::Discarded
                        {
                            return PollExit::Ended;
                        }
                    }
                    Err(error) => {
                        warn!("Poll read of {} failed: {}", target, error);
                        self.pipeline
                            .publish(StreamEvent::ReadFailed { source: target, error });

                        consecutive_failures += 1;
                        if let Some(limit) = self.max_consecutive_failures {
                            if consecutive_failures >= limit {
                                warn!("{} consecutive poll failures, giving up", consecutive_failures);
                                return PollExit::FailureLimit;
                            }
                        }
                    }
                }
            }
        }
    }
}
