//! Derives the `stats*` payloads from engine state.
use tokio::time::Instant;

use super::Engine;
use crate::types::protocol::{CommandCounts, JobStats, ServerStats};
use crate::types::JobId;
use crate::util::{self, cpu_usage};

/// Server-wide counters that aren't derived from current state.
#[derive(Debug, Default)]
pub(crate) struct ServerCounters {
    pub(crate) commands: CommandCounts,
    pub(crate) job_timeouts: u64,
    pub(crate) total_jobs: u64,
    pub(crate) total_connections: u64,
}

/// Identifies this server process in `stats`.
#[derive(Debug)]
pub(crate) struct Identity {
    pub(crate) id: String,
    pub(crate) hostname: String,
}

impl Identity {
    pub(crate) fn detect() -> Self {
        Self {
            id: util::random_server_id(),
            hostname: util::hostname(),
        }
    }
}

impl Engine {
    pub(crate) fn job_stats(&self, id: JobId, now: Instant) -> Option<JobStats> {
        let job = self.jobs.get(&id)?;

        Some(JobStats {
            id,
            tube: job.tube.clone(),
            state: job.state,
            pri: job.pri,
            age: now.saturating_duration_since(job.created).as_secs(),
            delay: job.delay.as_secs(),
            ttr: job.ttr.as_secs(),
            time_left: job.time_left(now).as_secs(),
            file: 0,
            reserves: job.reserves,
            timeouts: job.timeouts,
            releases: job.releases,
            buries: job.buries,
            kicks: job.kicks,
        })
    }

    pub(crate) fn server_stats(&self, now: Instant) -> ServerStats {
        let mut urgent = 0;
        let mut ready = 0;
        let mut reserved = 0;
        let mut delayed = 0;
        let mut buried = 0;

        for tube in self.tubes.iter() {
            let stats = tube.stats(now);
            urgent += stats.current_jobs_urgent;
            ready += stats.current_jobs_ready;
            reserved += stats.current_jobs_reserved;
            delayed += stats.current_jobs_delayed;
            buried += stats.current_jobs_buried;
        }

        let sessions = self.sessions.values();
        let producers = sessions.clone().filter(|s| s.is_producer).count();
        let workers = sessions.filter(|s| s.is_worker).count();
        let usage = cpu_usage();

        ServerStats {
            current_jobs_urgent: urgent,
            current_jobs_ready: ready,
            current_jobs_reserved: reserved,
            current_jobs_delayed: delayed,
            current_jobs_buried: buried,
            commands: self.counters.commands.clone(),
            job_timeouts: self.counters.job_timeouts,
            total_jobs: self.counters.total_jobs,
            max_job_size: self.config.max_job_size.into(),
            current_tubes: self.tubes.len() as u64,
            current_connections: self.sessions.len() as u64,
            current_producers: producers as u64,
            current_workers: workers as u64,
            current_waiting: self.waiting.len() as u64,
            total_connections: self.counters.total_connections,
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION"),
            rusage_utime: usage.user,
            rusage_stime: usage.system,
            uptime: now.saturating_duration_since(self.started).as_secs(),
            binlog_oldest_index: 0,
            binlog_current_index: 0,
            binlog_records_migrated: 0,
            binlog_records_written: 0,
            binlog_max_size: self.config.binlog_max_size,
            id: self.identity.id.clone(),
            hostname: self.identity.hostname.clone(),
        }
    }
}
