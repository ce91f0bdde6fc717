use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::states::JobState;
use super::JobId;

/// Ready jobs with a priority below this are counted as urgent.
pub(crate) const URGENT_THRESHOLD: u32 = 1024;

#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) tube: String,
    pub(crate) pri: u32,
    pub(crate) data: Bytes,
    pub(crate) state: JobState, // also contains state-specific data
    pub(crate) created: Instant,
    /// Delay set by the last put or release.
    pub(crate) delay: Duration,
    pub(crate) ttr: Duration,
    pub(crate) reserves: u64,
    pub(crate) timeouts: u64,
    pub(crate) releases: u64,
    pub(crate) buries: u64,
    pub(crate) kicks: u64,
}

impl Job {
    /// Creates a job in the ready or delayed state depending on `delay`. A
    /// TTR of zero is raised to one second.
    pub(crate) fn new(
        id: JobId,
        tube: String,
        pri: u32,
        delay: u32,
        ttr: u32,
        data: Bytes,
        now: Instant,
    ) -> Self {
        let delay = Duration::from_secs(delay.into());
        let state = if delay.is_zero() {
            JobState::Ready
        } else {
            JobState::Delayed { until: now + delay }
        };

        Self {
            id,
            tube,
            pri,
            data,
            state,
            created: now,
            delay,
            ttr: Duration::from_secs(ttr.max(1).into()),
            reserves: 0,
            timeouts: 0,
            releases: 0,
            buries: 0,
            kicks: 0,
        }
    }

    pub(crate) fn is_urgent(&self) -> bool {
        self.pri < URGENT_THRESHOLD
    }

    /// Position in a tube's ready queue: lower priority values first, then
    /// older jobs first.
    pub(crate) fn ready_key(&self) -> (u32, JobId) {
        (self.pri, self.id)
    }

    /// Seconds until the job next changes state on its own, or zero if it
    /// never will.
    pub(crate) fn time_left(&self, now: Instant) -> Duration {
        match self.state {
            JobState::Delayed { until } => until.saturating_duration_since(now),
            JobState::Reserved { deadline, .. } => {
                deadline.saturating_duration_since(now)
            },
            JobState::Ready | JobState::Buried { .. } => Duration::ZERO,
        }
    }
}
