use serde::Serialize;
use tokio::time::Instant;

use super::ConnId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum JobState {
    Ready,
    Delayed { until: Instant },
    Reserved { by: ConnId, deadline: Instant },
    /// `seq` orders buried jobs oldest first.
    Buried { seq: u64 },
}

impl JobState {
    pub(crate) fn name(&self) -> &'static str {
        use JobState::*;

        match self {
            Ready => "ready",
            Delayed { .. } => "delayed",
            Reserved { .. } => "reserved",
            Buried { .. } => "buried",
        }
    }

    /// Returns the holder of the job if it is reserved.
    pub(crate) fn holder(&self) -> Option<ConnId> {
        match self {
            JobState::Reserved { by, .. } => Some(*by),
            _ => None,
        }
    }
}

// This impl is used to allow JobStats to be serialised to YAML.
impl Serialize for JobState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}
