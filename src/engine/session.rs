use std::collections::BTreeSet;

use tokio::time::Instant;

use super::tube::DEFAULT_TUBE;
use crate::types::JobId;

/// A blocked reserve request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Waiting {
    /// Global arrival order of the request.
    pub(crate) seq: u64,
    /// None waits forever.
    pub(crate) deadline: Option<Instant>,
}

/// Per-connection state held by the engine.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) used: String,
    /// Kept in the order tubes were watched.
    pub(crate) watched: Vec<String>,
    pub(crate) held: BTreeSet<JobId>,
    pub(crate) waiting: Option<Waiting>,
    pub(crate) is_producer: bool,
    pub(crate) is_worker: bool,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            used: DEFAULT_TUBE.to_owned(),
            watched: vec![DEFAULT_TUBE.to_owned()],
            held: BTreeSet::new(),
            waiting: None,
            is_producer: false,
            is_worker: false,
        }
    }

    pub(crate) fn watches(&self, tube: &str) -> bool {
        self.watched.iter().any(|name| name == tube)
    }
}
