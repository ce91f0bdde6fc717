pub mod job;
pub mod protocol;
pub mod serialisable;
pub mod states;

/// Server-wide job identifier. Assigned from 1 upwards and never reused, so
/// an id of 0 never names a job.
pub type JobId = u64;

/// Identifies one client connection for the lifetime of the server.
pub type ConnId = u64;
