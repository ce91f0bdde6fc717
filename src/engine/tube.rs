use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::job::Job;
use crate::types::protocol::TubeStats;
use crate::types::states::JobState;
use crate::types::{ConnId, JobId};

/// The tube every connection starts out using and watching. It is never
/// destroyed.
pub(crate) const DEFAULT_TUBE: &str = "default";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Pause {
    pub(crate) duration: Duration,
    pub(crate) until: Instant,
}

/// A named queue of jobs. Reserved jobs are only counted here; the engine
/// tracks who holds them.
#[derive(Debug)]
pub(crate) struct Tube {
    pub(crate) name: String,
    /// Creation order, for listing.
    created_seq: u64,

    pub(crate) ready: BTreeSet<(u32, JobId)>,
    pub(crate) delayed: BTreeSet<(Instant, JobId)>,
    pub(crate) buried: BTreeSet<(u64, JobId)>,
    /// Connections blocked in a reserve that watch this tube, by the order
    /// they started waiting.
    pub(crate) waiters: BTreeSet<(u64, ConnId)>,

    urgent: u64,
    reserved: u64,
    pub(crate) total_jobs: u64,
    pub(crate) using: u64,
    pub(crate) watching: u64,
    pub(crate) cmd_delete: u64,
    pub(crate) cmd_pause_tube: u64,
    pub(crate) pause: Option<Pause>,
}

impl Tube {
    fn new(name: String, created_seq: u64) -> Self {
        Self {
            name,
            created_seq,
            ready: BTreeSet::new(),
            delayed: BTreeSet::new(),
            buried: BTreeSet::new(),
            waiters: BTreeSet::new(),
            urgent: 0,
            reserved: 0,
            total_jobs: 0,
            using: 0,
            watching: 0,
            cmd_delete: 0,
            cmd_pause_tube: 0,
            pause: None,
        }
    }

    /// Files `job` under the sub-queue matching its current state.
    pub(crate) fn insert(&mut self, job: &Job) {
        match job.state {
            JobState::Ready => {
                self.ready.insert(job.ready_key());
                if job.is_urgent() {
                    self.urgent += 1;
                }
            },
            JobState::Delayed { until } => {
                self.delayed.insert((until, job.id));
            },
            JobState::Reserved { .. } => self.reserved += 1,
            JobState::Buried { seq } => {
                self.buried.insert((seq, job.id));
            },
        }
    }

    /// Reverses `insert`. The job must not have changed since it was filed.
    pub(crate) fn remove(&mut self, job: &Job) {
        match job.state {
            JobState::Ready => {
                if self.ready.remove(&job.ready_key()) && job.is_urgent() {
                    self.urgent -= 1;
                }
            },
            JobState::Delayed { until } => {
                self.delayed.remove(&(until, job.id));
            },
            JobState::Reserved { .. } => {
                self.reserved = self.reserved.saturating_sub(1)
            },
            JobState::Buried { seq } => {
                self.buried.remove(&(seq, job.id));
            },
        }
    }

    pub(crate) fn is_paused(&self, now: Instant) -> bool {
        self.pause.is_some_and(|pause| pause.until > now)
    }

    pub(crate) fn job_count(&self) -> u64 {
        (self.ready.len() + self.delayed.len() + self.buried.len()) as u64
            + self.reserved
    }

    /// True when nothing refers to this tube and it holds no jobs.
    fn is_idle(&self) -> bool {
        self.using == 0 && self.watching == 0 && self.job_count() == 0
    }

    pub(crate) fn stats(&self, now: Instant) -> TubeStats {
        let (pause, pause_time_left) = match self.pause {
            Some(pause) => (
                pause.duration.as_secs(),
                pause.until.saturating_duration_since(now).as_secs(),
            ),
            None => (0, 0),
        };

        TubeStats {
            name: self.name.clone(),
            current_jobs_urgent: self.urgent,
            current_jobs_ready: self.ready.len() as u64,
            current_jobs_reserved: self.reserved,
            current_jobs_delayed: self.delayed.len() as u64,
            current_jobs_buried: self.buried.len() as u64,
            total_jobs: self.total_jobs,
            current_using: self.using,
            current_watching: self.watching,
            current_waiting: self.waiters.len() as u64,
            cmd_delete: self.cmd_delete,
            cmd_pause_tube: self.cmd_pause_tube,
            pause,
            pause_time_left,
        }
    }
}

/// All existing tubes, by name.
#[derive(Debug)]
pub(crate) struct TubeRegistry {
    tubes: HashMap<String, Tube>,
    created: u64,
}

impl TubeRegistry {
    pub(crate) fn new() -> Self {
        let mut registry = Self {
            tubes: HashMap::new(),
            created: 0,
        };
        registry.ensure(DEFAULT_TUBE);
        registry
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Tube> {
        self.tubes.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Tube> {
        self.tubes.get_mut(name)
    }

    /// Returns the named tube, creating it if it doesn't exist yet.
    pub(crate) fn ensure(&mut self, name: &str) -> &mut Tube {
        let created = &mut self.created;
        self.tubes.entry(name.to_owned()).or_insert_with(|| {
            *created += 1;
            Tube::new(name.to_owned(), *created)
        })
    }

    /// Destroys the named tube if it has become idle. Returns whether it did.
    pub(crate) fn prune(&mut self, name: &str) -> bool {
        if name == DEFAULT_TUBE {
            return false;
        }

        match self.tubes.get(name) {
            Some(tube) if tube.is_idle() => {
                self.tubes.remove(name);
                true
            },
            _ => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Tube> {
        self.tubes.values()
    }

    /// Tube names in the order the tubes were created.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut tubes: Vec<&Tube> = self.tubes.values().collect();
        tubes.sort_by_key(|tube| tube.created_seq);
        tubes.into_iter().map(|tube| tube.name.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tubes.len()
    }
}
