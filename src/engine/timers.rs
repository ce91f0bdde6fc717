use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::time::Instant;

use crate::types::{ConnId, JobId};

/// Something the engine must re-examine at a point in time.
///
/// A wake is still checked against current state when it fires, so one left
/// behind by a state change is dropped rather than acted on.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) enum Wake {
    DelayElapsed(JobId),
    TtrExpired(JobId),
    DeadlineSoon(JobId),
    PauseElapsed(String),
    /// Carries the sequence number of the wait it was scheduled for.
    ReserveTimeout(ConnId, u64),
}

/// A min-heap of wakes keyed by time, then by scheduling order.
///
/// At most one instance of each wake is live. Rescheduling a wake replaces
/// the earlier instance and cancelling removes it. Replaced entries are left
/// in the heap and skipped, and the heap is rebuilt once they outnumber the
/// live ones.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, Wake)>>,
    /// The scheduling number of each wake's live instance.
    live: HashMap<Wake, u64>,
    scheduled: u64,
}

impl TimerQueue {
    pub(crate) fn schedule(&mut self, at: Instant, wake: Wake) {
        self.scheduled += 1;
        self.live.insert(wake.clone(), self.scheduled);
        self.heap.push(Reverse((at, self.scheduled, wake)));
        self.settle();
    }

    pub(crate) fn cancel(&mut self, wake: &Wake) {
        if self.live.remove(wake).is_some() {
            self.settle();
        }
    }

    /// When the earliest wake is due, if any are scheduled.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Removes and returns the earliest wake if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Wake> {
        if self.next_wake()? > now {
            return None;
        }

        let Reverse((_, _, wake)) = self.heap.pop()?;
        self.live.remove(&wake);
        self.settle();

        Some(wake)
    }

    fn is_live(live: &HashMap<Wake, u64>, seq: u64, wake: &Wake) -> bool {
        live.get(wake) == Some(&seq)
    }

    /// Keeps a live wake at the top of the heap, and drops dead entries
    /// wholesale once they make up most of it.
    fn settle(&mut self) {
        if self.heap.len() > 2 * self.live.len() + 16 {
            let live = &self.live;
            self.heap
                .retain(|Reverse((_, seq, wake))| Self::is_live(live, *seq, wake));
        }

        while let Some(Reverse((_, seq, wake))) = self.heap.peek() {
            if Self::is_live(&self.live, *seq, wake) {
                break;
            }
            self.heap.pop();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
