use bytes::Bytes;
use serde::Serialize;

use super::serialisable::BeanstalkSerialisable;
use super::states::JobState;
use super::JobId;

/// A parsed request line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum BeanstalkCommand {
    /// `put <pri> <delay> <ttr> <n_bytes>`, followed by the body and a CRLF.
    Put {
        pri: u32,
        delay: u32,
        ttr: u32,
        n_bytes: u32,
    },
    Reserve,
    /// `None` waits forever, which is what a negative timeout asks for.
    ReserveWithTimeout { timeout: Option<u32> },
    Release { id: JobId, pri: u32, delay: u32 },
    Delete { id: JobId },
    Bury { id: JobId, pri: u32 },
    /// Restarts the holder's TTR clock.
    Touch { id: JobId },
    Watch { tube: String },
    Ignore { tube: String },
    /// Finds a job in any state.
    Peek { id: JobId },
    PeekReady,
    PeekDelayed,
    PeekBuried,
    /// Kicks buried jobs on the used tube, or delayed ones when none are
    /// buried.
    Kick { bound: u64 },
    KickJob { id: JobId },
    StatsJob { id: JobId },
    StatsTube { tube: String },
    StatsServer,
    ListTubes,
    ListTubeUsed,
    ListTubesWatched,
    Quit,
    /// Holds back reservations from `tube` for `delay` seconds.
    PauseTube { tube: String, delay: u32 },
    Use { tube: String },
}

/// Every reply the server can send.
#[derive(Debug, PartialEq)]
pub(crate) enum BeanstalkResponse {
    InternalError,
    BadFormat,
    UnknownCommand,
    Inserted { id: JobId },
    /// The put body wasn't followed by CRLF.
    ExpectedCRLF,
    JobTooBig,
    Using { tube: String },
    /// A job held by the client is within a second of its TTR deadline.
    DeadlineSoon,
    TimedOut,
    Reserved { id: JobId, data: Bytes },
    /// Unknown job or tube, or a job the client may not act on in its current
    /// state.
    NotFound,
    Deleted,
    Released,
    Buried,
    Touched,
    Watching { count: usize },
    /// Ignoring would leave the watch list empty.
    NotIgnored,
    Found { id: JobId, data: Bytes },
    KickedCount { count: u64 },
    Kicked,
    OkStatsJob { data: JobStats },
    OkStats { data: Box<ServerStats> },
    OkStatsTube { data: TubeStats },
    OkListTubes { tubes: Vec<String> },
    Paused,
}

/// Frames `value` as a YAML document in an `OK <n_bytes>` reply.
fn ok_yaml<T: Serialize>(value: &T) -> Vec<u8> {
    match serde_yaml::to_string(value) {
        Ok(data) => {
            let data = format!("---\n{data}");
            format!("OK {}\r\n{data}\r\n", data.len()).into()
        },
        Err(_) => b"INTERNAL_ERROR\r\n".to_vec(),
    }
}

/// Frames a job body with the given status line.
fn with_body(status: String, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(status.len() + data.len() + 4);
    out.extend_from_slice(status.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

impl BeanstalkSerialisable for BeanstalkResponse {
    fn serialise_beanstalk(&self) -> Vec<u8> {
        use BeanstalkResponse::*;

        match self {
            InternalError => b"INTERNAL_ERROR\r\n".to_vec(),
            BadFormat => b"BAD_FORMAT\r\n".to_vec(),
            UnknownCommand => b"UNKNOWN_COMMAND\r\n".to_vec(),
            Inserted { id } => format!("INSERTED {id}\r\n").into(),
            ExpectedCRLF => b"EXPECTED_CRLF\r\n".to_vec(),
            JobTooBig => b"JOB_TOO_BIG\r\n".to_vec(),
            Using { tube } => format!("USING {tube}\r\n").into(),
            DeadlineSoon => b"DEADLINE_SOON\r\n".to_vec(),
            TimedOut => b"TIMED_OUT\r\n".to_vec(),
            Reserved { id, data } => {
                with_body(format!("RESERVED {id} {}", data.len()), data)
            },
            NotFound => b"NOT_FOUND\r\n".to_vec(),
            Released => b"RELEASED\r\n".to_vec(),
            Watching { count } => format!("WATCHING {count}\r\n").into(),
            NotIgnored => b"NOT_IGNORED\r\n".to_vec(),
            Found { id, data } => {
                with_body(format!("FOUND {id} {}", data.len()), data)
            },
            KickedCount { count } => format!("KICKED {count}\r\n").into(),
            Kicked => b"KICKED\r\n".to_vec(),
            OkStatsJob { data } => ok_yaml(data),
            OkStats { data } => ok_yaml(data),
            OkStatsTube { data } => ok_yaml(data),
            OkListTubes { tubes } => ok_yaml(tubes),
            Paused => b"PAUSED\r\n".to_vec(),
            Deleted => b"DELETED\r\n".to_vec(),
            Buried => b"BURIED\r\n".to_vec(),
            Touched => b"TOUCHED\r\n".to_vec(),
        }
    }
}

/// The `stats-job` payload. Field order is the wire order.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct JobStats {
    pub(crate) id: JobId,
    pub(crate) tube: String,
    pub(crate) state: JobState,
    pub(crate) pri: u32,

    pub(crate) age: u64,
    pub(crate) delay: u64,
    pub(crate) ttr: u64,
    pub(crate) time_left: u64,

    /// Always 0: jobs are never written to disk.
    pub(crate) file: u64,

    pub(crate) reserves: u64,
    pub(crate) timeouts: u64,
    pub(crate) releases: u64,
    pub(crate) buries: u64,
    pub(crate) kicks: u64,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct TubeStats {
    pub(crate) name: String,
    pub(crate) current_jobs_urgent: u64,
    pub(crate) current_jobs_ready: u64,
    pub(crate) current_jobs_reserved: u64,
    pub(crate) current_jobs_delayed: u64,
    pub(crate) current_jobs_buried: u64,
    pub(crate) total_jobs: u64,
    pub(crate) current_using: u64,
    pub(crate) current_watching: u64,
    pub(crate) current_waiting: u64,
    pub(crate) cmd_delete: u64,
    pub(crate) cmd_pause_tube: u64,
    /// Length of the current pause in seconds, 0 when not paused.
    pub(crate) pause: u64,
    pub(crate) pause_time_left: u64,
}

/// The `stats` payload.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ServerStats {
    pub(crate) current_jobs_urgent: u64,
    pub(crate) current_jobs_ready: u64,
    pub(crate) current_jobs_reserved: u64,
    pub(crate) current_jobs_delayed: u64,
    pub(crate) current_jobs_buried: u64,

    #[serde(flatten)]
    pub(crate) commands: CommandCounts,

    pub(crate) job_timeouts: u64,
    pub(crate) total_jobs: u64,
    pub(crate) max_job_size: u64,
    pub(crate) current_tubes: u64,
    pub(crate) current_connections: u64,
    pub(crate) current_producers: u64,
    pub(crate) current_workers: u64,
    pub(crate) current_waiting: u64,
    pub(crate) total_connections: u64,
    pub(crate) pid: u32,
    pub(crate) version: &'static str,
    pub(crate) rusage_utime: f64,
    pub(crate) rusage_stime: f64,
    pub(crate) uptime: u64,

    // Nothing is written to disk, so only the size limit is ever non-zero.
    pub(crate) binlog_oldest_index: u64,
    pub(crate) binlog_current_index: u64,
    pub(crate) binlog_records_migrated: u64,
    pub(crate) binlog_records_written: u64,
    pub(crate) binlog_max_size: u64,

    /// Random per process.
    pub(crate) id: String,
    pub(crate) hostname: String,
}

/// Per-command counters, in the order `stats` reports them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct CommandCounts {
    #[serde(rename = "cmd-put")]
    pub(crate) put: u64,
    #[serde(rename = "cmd-peek")]
    pub(crate) peek: u64,
    #[serde(rename = "cmd-peek-ready")]
    pub(crate) peek_ready: u64,
    #[serde(rename = "cmd-peek-delayed")]
    pub(crate) peek_delayed: u64,
    #[serde(rename = "cmd-peek-buried")]
    pub(crate) peek_buried: u64,
    #[serde(rename = "cmd-reserve")]
    pub(crate) reserve: u64,
    #[serde(rename = "cmd-reserve-with-timeout")]
    pub(crate) reserve_with_timeout: u64,
    #[serde(rename = "cmd-delete")]
    pub(crate) delete: u64,
    #[serde(rename = "cmd-release")]
    pub(crate) release: u64,
    #[serde(rename = "cmd-use")]
    pub(crate) use_tube: u64,
    #[serde(rename = "cmd-watch")]
    pub(crate) watch: u64,
    #[serde(rename = "cmd-ignore")]
    pub(crate) ignore: u64,
    #[serde(rename = "cmd-bury")]
    pub(crate) bury: u64,
    #[serde(rename = "cmd-kick")]
    pub(crate) kick: u64,
    #[serde(rename = "cmd-touch")]
    pub(crate) touch: u64,
    #[serde(rename = "cmd-stats")]
    pub(crate) stats: u64,
    #[serde(rename = "cmd-stats-job")]
    pub(crate) stats_job: u64,
    #[serde(rename = "cmd-stats-tube")]
    pub(crate) stats_tube: u64,
    #[serde(rename = "cmd-list-tubes")]
    pub(crate) list_tubes: u64,
    #[serde(rename = "cmd-list-tube-used")]
    pub(crate) list_tube_used: u64,
    #[serde(rename = "cmd-list-tubes-watched")]
    pub(crate) list_tubes_watched: u64,
    #[serde(rename = "cmd-pause-tube")]
    pub(crate) pause_tube: u64,
}

impl CommandCounts {
    /// Bumps the counter for `cmd`. `quit` has no counter.
    pub(crate) fn count(&mut self, cmd: &BeanstalkCommand) {
        use BeanstalkCommand::*;

        let counter = match cmd {
            Put { .. } => &mut self.put,
            Peek { .. } => &mut self.peek,
            PeekReady => &mut self.peek_ready,
            PeekDelayed => &mut self.peek_delayed,
            PeekBuried => &mut self.peek_buried,
            Reserve => &mut self.reserve,
            ReserveWithTimeout { .. } => &mut self.reserve_with_timeout,
            Delete { .. } => &mut self.delete,
            Release { .. } => &mut self.release,
            Use { .. } => &mut self.use_tube,
            Watch { .. } => &mut self.watch,
            Ignore { .. } => &mut self.ignore,
            Bury { .. } => &mut self.bury,
            Kick { .. } | KickJob { .. } => &mut self.kick,
            Touch { .. } => &mut self.touch,
            StatsServer => &mut self.stats,
            StatsJob { .. } => &mut self.stats_job,
            StatsTube { .. } => &mut self.stats_tube,
            ListTubes => &mut self.list_tubes,
            ListTubeUsed => &mut self.list_tube_used,
            ListTubesWatched => &mut self.list_tubes_watched,
            PauseTube { .. } => &mut self.pause_tube,
            Quit => return,
        };

        *counter += 1;
    }
}
