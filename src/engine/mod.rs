//! The job scheduler.
//!
//! A single [`Engine`] owns every job, tube and connection. It is synchronous:
//! each call takes the current time, mutates state, and either answers
//! directly or parks the caller. Answers for parked callers accumulate in
//! `deliveries`, to be handed out by whoever drives the engine (see
//! [`EngineHandle`]).
mod handle;
mod session;
mod stats;
mod timers;
mod tube;

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

pub use self::handle::EngineHandle;
pub(crate) use self::handle::Reply;
use self::session::{Session, Waiting};
use self::stats::{Identity, ServerCounters};
use self::timers::{TimerQueue, Wake};
use self::tube::{Pause, Tube, TubeRegistry, DEFAULT_TUBE};
use crate::config::Config;
use crate::error::BeanstalkError;
use crate::types::job::Job;
use crate::types::protocol::{BeanstalkCommand, BeanstalkResponse};
use crate::types::states::JobState;
use crate::types::{ConnId, JobId};

/// Holders of a reservation are warned this long before it expires.
const SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// A unit of work submitted by a connection.
#[derive(Debug, PartialEq)]
pub(crate) enum Request {
    /// Any command other than `put`.
    Command(BeanstalkCommand),
    /// A `put` whose body has been read and checked.
    Put {
        pri: u32,
        delay: u32,
        ttr: u32,
        data: Bytes,
    },
    /// A `put` refused before reaching the engine. It still counts.
    RejectedPut(PutRejection),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PutRejection {
    TooBig,
    MissingCrlf,
    TrailingArgs,
}

impl From<PutRejection> for BeanstalkError {
    fn from(value: PutRejection) -> Self {
        match value {
            PutRejection::TooBig => BeanstalkError::JobTooBig,
            PutRejection::MissingCrlf => BeanstalkError::ExpectedCrlf,
            PutRejection::TrailingArgs => BeanstalkError::BadFormat,
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Outcome {
    Reply(BeanstalkResponse),
    /// The connection is blocked in a reserve; its answer will appear in the
    /// engine's deliveries.
    Pending,
    /// The connection asked to be closed.
    Closed,
}

type Response = Result<BeanstalkResponse, BeanstalkError>;

fn secs(n: u32) -> Duration {
    Duration::from_secs(n.into())
}

/// Cancels the timers a job scheduled on entering `state`.
fn cancel_wakes(timers: &mut TimerQueue, id: JobId, state: JobState) {
    match state {
        JobState::Reserved { .. } => {
            timers.cancel(&Wake::TtrExpired(id));
            timers.cancel(&Wake::DeadlineSoon(id));
        },
        JobState::Delayed { .. } => timers.cancel(&Wake::DelayElapsed(id)),
        JobState::Ready | JobState::Buried { .. } => {},
    }
}

pub(crate) struct Engine {
    config: Config,
    started: Instant,
    jobs: HashMap<JobId, Job>,
    tubes: TubeRegistry,
    sessions: HashMap<ConnId, Session>,
    /// Blocked reserve requests by arrival order.
    waiting: BTreeMap<u64, ConnId>,
    timers: TimerQueue,
    counters: ServerCounters,
    identity: Identity,
    next_job_id: JobId,
    next_conn_id: ConnId,
    /// Shared by bury order and wait order. Both only need to be monotonic.
    next_seq: u64,
    deliveries: Vec<(ConnId, BeanstalkResponse)>,
}

impl Engine {
    pub(crate) fn new(config: Config, now: Instant) -> Self {
        Self {
            config,
            started: now,
            jobs: HashMap::new(),
            tubes: TubeRegistry::new(),
            sessions: HashMap::new(),
            waiting: BTreeMap::new(),
            timers: TimerQueue::default(),
            counters: ServerCounters::default(),
            identity: Identity::detect(),
            next_job_id: 1,
            next_conn_id: 1,
            next_seq: 0,
            deliveries: Vec::new(),
        }
    }

    /// Registers a new connection using and watching the default tube.
    pub(crate) fn connect(&mut self) -> ConnId {
        let conn = self.next_conn_id;
        self.next_conn_id += 1;

        let default = self.tubes.ensure(DEFAULT_TUBE);
        default.using += 1;
        default.watching += 1;

        self.sessions.insert(conn, Session::new());
        self.counters.total_connections += 1;

        debug!(conn, "connection registered");
        conn
    }

    /// Forgets a connection. Its pending reserve is cancelled and the jobs it
    /// held go back to ready.
    pub(crate) fn disconnect(&mut self, conn: ConnId, now: Instant) {
        self.end_wait(conn);

        let Some(session) = self.sessions.remove(&conn) else {
            return;
        };

        for id in &session.held {
            self.update_job(*id, |job| job.state = JobState::Ready);
        }

        if let Some(tube) = self.tubes.get_mut(&session.used) {
            tube.using = tube.using.saturating_sub(1);
        }
        for name in &session.watched {
            if let Some(tube) = self.tubes.get_mut(name) {
                tube.watching = tube.watching.saturating_sub(1);
            }
        }

        self.prune_tube(&session.used);
        for name in &session.watched {
            self.prune_tube(name);
        }

        self.dispatch(now);

        debug!(conn, released = session.held.len(), "connection dropped");
    }

    /// Withdraws the pending reserve of a connection whose peer has hung up.
    /// Its jobs stay held until it disconnects.
    pub(crate) fn abandon_wait(&mut self, conn: ConnId) {
        self.end_wait(conn);
        debug!(conn, "reserve abandoned");
    }

    /// Runs one request for `conn`.
    pub(crate) fn handle(
        &mut self,
        conn: ConnId,
        request: Request,
        now: Instant,
    ) -> Outcome {
        // Timers due by now must take effect before the request sees state.
        self.tick(now);

        let result = match request {
            Request::RejectedPut(rejection) => {
                self.counters.commands.put += 1;
                Err(rejection.into())
            },
            Request::Put {
                pri,
                delay,
                ttr,
                data,
            } => {
                self.counters.commands.put += 1;
                self.put(conn, pri, delay, ttr, data, now)
            },
            Request::Command(cmd) => {
                self.counters.commands.count(&cmd);

                match cmd {
                    BeanstalkCommand::Reserve => {
                        return self.reserve(conn, None, now)
                    },
                    BeanstalkCommand::ReserveWithTimeout { timeout } => {
                        return self.reserve(conn, timeout.map(secs), now)
                    },
                    BeanstalkCommand::Quit => return Outcome::Closed,
                    cmd => self.command(conn, cmd, now),
                }
            },
        };

        Outcome::Reply(result.unwrap_or_else(BeanstalkResponse::from))
    }

    /// Applies every timer due by `now`, then hands out whatever became
    /// reservable.
    pub(crate) fn tick(&mut self, now: Instant) {
        while let Some(wake) = self.timers.pop_due(now) {
            self.wake(wake, now);
        }

        self.dispatch(now);
    }

    /// When `tick` next needs calling.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.timers.next_wake()
    }

    /// Answers produced for blocked connections since the last call.
    pub(crate) fn take_deliveries(&mut self) -> Vec<(ConnId, BeanstalkResponse)> {
        mem::take(&mut self.deliveries)
    }

    fn command(
        &mut self,
        conn: ConnId,
        cmd: BeanstalkCommand,
        now: Instant,
    ) -> Response {
        use BeanstalkCommand::*;

        match cmd {
            // Bodies arrive as Request::Put; the rest never reach here.
            Put { .. } | Reserve | ReserveWithTimeout { .. } | Quit => {
                Err(BeanstalkError::Internal)
            },
            Release { id, pri, delay } => {
                self.release(conn, id, pri, delay, now)
            },
            Delete { id } => self.delete(conn, id),
            Bury { id, pri } => self.bury(conn, id, pri),
            Touch { id } => self.touch(conn, id, now),
            Use { tube } => self.use_tube(conn, tube),
            Watch { tube } => self.watch(conn, tube),
            Ignore { tube } => self.ignore(conn, tube),
            Peek { id } => self.peek(id),
            PeekReady => self.peek_used(conn, |tube| {
                tube.ready.first().map(|(_, id)| *id)
            }),
            PeekDelayed => self.peek_used(conn, |tube| {
                tube.delayed.first().map(|(_, id)| *id)
            }),
            PeekBuried => self.peek_used(conn, |tube| {
                tube.buried.first().map(|(_, id)| *id)
            }),
            Kick { bound } => self.kick(conn, bound, now),
            KickJob { id } => self.kick_job(id, now),
            StatsJob { id } => self
                .job_stats(id, now)
                .map(|data| BeanstalkResponse::OkStatsJob { data })
                .ok_or(BeanstalkError::NotFound),
            StatsTube { tube } => self
                .tubes
                .get(&tube)
                .map(|tube| BeanstalkResponse::OkStatsTube {
                    data: tube.stats(now),
                })
                .ok_or(BeanstalkError::NotFound),
            StatsServer => Ok(BeanstalkResponse::OkStats {
                data: Box::new(self.server_stats(now)),
            }),
            ListTubes => Ok(BeanstalkResponse::OkListTubes {
                tubes: self.tubes.names(),
            }),
            ListTubeUsed => Ok(BeanstalkResponse::Using {
                tube: self.session(conn)?.used.clone(),
            }),
            ListTubesWatched => Ok(BeanstalkResponse::OkListTubes {
                tubes: self.session(conn)?.watched.clone(),
            }),
            PauseTube { tube, delay } => self.pause_tube(tube, delay, now),
        }
    }

    fn session(&self, conn: ConnId) -> Result<&Session, BeanstalkError> {
        self.sessions.get(&conn).ok_or(BeanstalkError::Internal)
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Whether `conn` currently holds job `id` reserved.
    fn holds(&self, conn: ConnId, id: JobId) -> bool {
        self.jobs
            .get(&id)
            .and_then(|job| job.state.holder())
            .is_some_and(|holder| holder == conn)
    }

    /// Moves a job between states. `change` runs while the job is detached
    /// from its tube, so it may alter anything that decides where the job is
    /// filed (state and priority).
    fn update_job(&mut self, id: JobId, change: impl FnOnce(&mut Job)) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let mut tube = self.tubes.get_mut(&job.tube);

        let previous = job.state;
        if let Some(tube) = tube.as_mut() {
            tube.remove(job);
        }

        change(job);
        cancel_wakes(&mut self.timers, id, previous);

        if let Some(holder) = previous.holder() {
            if let Some(session) = self.sessions.get_mut(&holder) {
                session.held.remove(&id);
            }
        }

        match job.state {
            JobState::Reserved { by, deadline } => {
                if let Some(session) = self.sessions.get_mut(&by) {
                    session.held.insert(id);
                }
                self.timers.schedule(deadline, Wake::TtrExpired(id));
                self.timers.schedule(
                    deadline.checked_sub(SAFETY_MARGIN).unwrap_or(deadline),
                    Wake::DeadlineSoon(id),
                );
            },
            JobState::Delayed { until } => {
                self.timers.schedule(until, Wake::DelayElapsed(id))
            },
            JobState::Ready | JobState::Buried { .. } => {},
        }

        if let Some(tube) = tube {
            tube.insert(job);
        }

        debug!(
            id,
            from = previous.name(),
            to = job.state.name(),
            "job state changed"
        );
    }

    fn wake(&mut self, wake: Wake, now: Instant) {
        let state_of = |id| self.jobs.get(&id).map(|job: &Job| job.state);

        match wake {
            Wake::DelayElapsed(id) => {
                if matches!(state_of(id), Some(JobState::Delayed { until }) if until <= now)
                {
                    self.update_job(id, |job| job.state = JobState::Ready);
                }
            },
            Wake::TtrExpired(id) => {
                if matches!(state_of(id), Some(JobState::Reserved { deadline, .. }) if deadline <= now)
                {
                    self.counters.job_timeouts += 1;
                    self.update_job(id, |job| {
                        job.timeouts += 1;
                        job.state = JobState::Ready;
                    });
                }
            },
            Wake::DeadlineSoon(id) => {
                if let Some(JobState::Reserved { by, deadline }) = state_of(id) {
                    let is_waiting = self
                        .sessions
                        .get(&by)
                        .is_some_and(|session| session.waiting.is_some());

                    if is_waiting
                        && deadline > now
                        && deadline <= now + SAFETY_MARGIN
                    {
                        self.end_wait(by);
                        self.deliveries
                            .push((by, BeanstalkError::DeadlineSoon.into()));
                    }
                }
            },
            Wake::PauseElapsed(name) => {
                if let Some(tube) = self.tubes.get_mut(&name) {
                    if tube.pause.is_some_and(|pause| pause.until <= now) {
                        tube.pause = None;
                        debug!(tube = %name, "tube unpaused");
                    }
                }
            },
            Wake::ReserveTimeout(conn, seq) => {
                let is_current = self
                    .sessions
                    .get(&conn)
                    .and_then(|session| session.waiting)
                    .is_some_and(|waiting| waiting.seq == seq);

                if is_current {
                    self.end_wait(conn);
                    self.deliveries.push((conn, BeanstalkError::TimedOut.into()));
                }
            },
        }
    }

    /// Grants ready jobs to blocked connections, earliest waiter first.
    fn dispatch(&mut self, now: Instant) {
        if self.waiting.is_empty() {
            return;
        }

        let waiting: Vec<ConnId> = self.waiting.values().copied().collect();
        for conn in waiting {
            if let Some(id) = self.best_ready(conn, now) {
                self.end_wait(conn);
                let response = self.reserve_job(conn, id, now);
                self.deliveries.push((conn, response));
            }
        }
    }

    /// The most urgent ready job across the unpaused tubes `conn` watches.
    fn best_ready(&self, conn: ConnId, now: Instant) -> Option<JobId> {
        let session = self.sessions.get(&conn)?;

        session
            .watched
            .iter()
            .filter_map(|name| self.tubes.get(name))
            .filter(|tube| !tube.is_paused(now))
            .filter_map(|tube| tube.ready.first())
            .min()
            .map(|(_, id)| *id)
    }

    /// Whether any job `conn` holds is within the safety margin of expiring.
    fn deadline_soon(&self, conn: ConnId, now: Instant) -> bool {
        let Some(session) = self.sessions.get(&conn) else {
            return false;
        };

        session
            .held
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .any(|job| {
                matches!(job.state, JobState::Reserved { deadline, .. } if deadline <= now + SAFETY_MARGIN)
            })
    }

    fn reserve_job(
        &mut self,
        conn: ConnId,
        id: JobId,
        now: Instant,
    ) -> BeanstalkResponse {
        self.update_job(id, |job| {
            job.reserves += 1;
            job.state = JobState::Reserved {
                by: conn,
                deadline: now + job.ttr,
            };
        });

        match self.jobs.get(&id) {
            Some(job) => BeanstalkResponse::Reserved {
                id,
                data: job.data.clone(),
            },
            None => BeanstalkResponse::InternalError,
        }
    }

    /// Destroys tube `name` if nothing refers to it any more.
    fn prune_tube(&mut self, name: &str) {
        if self.tubes.prune(name) {
            self.timers.cancel(&Wake::PauseElapsed(name.to_owned()));
            debug!(tube = name, "tube destroyed");
        }
    }

    /// Removes `conn` from every waiter list, if it is waiting.
    fn end_wait(&mut self, conn: ConnId) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        let Some(waiting) = session.waiting.take() else {
            return;
        };

        self.waiting.remove(&waiting.seq);
        self.timers.cancel(&Wake::ReserveTimeout(conn, waiting.seq));
        for name in &session.watched {
            if let Some(tube) = self.tubes.get_mut(name) {
                tube.waiters.remove(&(waiting.seq, conn));
            }
        }
    }

    fn put(
        &mut self,
        conn: ConnId,
        pri: u32,
        delay: u32,
        ttr: u32,
        data: Bytes,
        now: Instant,
    ) -> Response {
        if data.len() > self.config.max_job_size as usize {
            return Err(BeanstalkError::JobTooBig);
        }

        let session = self
            .sessions
            .get_mut(&conn)
            .ok_or(BeanstalkError::Internal)?;
        session.is_producer = true;

        let id = self.next_job_id;
        self.next_job_id += 1;

        let job = Job::new(id, session.used.clone(), pri, delay, ttr, data, now);
        if let JobState::Delayed { until } = job.state {
            self.timers.schedule(until, Wake::DelayElapsed(id));
        }

        let tube = self.tubes.ensure(&job.tube);
        tube.insert(&job);
        tube.total_jobs += 1;
        self.counters.total_jobs += 1;

        debug!(id, tube = %job.tube, state = job.state.name(), "job inserted");
        self.jobs.insert(id, job);

        self.dispatch(now);

        Ok(BeanstalkResponse::Inserted { id })
    }

    fn reserve(
        &mut self,
        conn: ConnId,
        timeout: Option<Duration>,
        now: Instant,
    ) -> Outcome {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return Outcome::Reply(BeanstalkResponse::InternalError);
        };
        session.is_worker = true;

        if self.deadline_soon(conn, now) {
            return Outcome::Reply(BeanstalkError::DeadlineSoon.into());
        }

        if let Some(id) = self.best_ready(conn, now) {
            return Outcome::Reply(self.reserve_job(conn, id, now));
        }

        if timeout == Some(Duration::ZERO) {
            return Outcome::Reply(BeanstalkError::TimedOut.into());
        }

        self.end_wait(conn);
        let seq = self.next_seq();
        let deadline = timeout.map(|timeout| now + timeout);

        if let Some(session) = self.sessions.get_mut(&conn) {
            session.waiting = Some(Waiting { seq, deadline });
            for name in &session.watched {
                if let Some(tube) = self.tubes.get_mut(name) {
                    tube.waiters.insert((seq, conn));
                }
            }
        }
        self.waiting.insert(seq, conn);

        if let Some(deadline) = deadline {
            self.timers.schedule(deadline, Wake::ReserveTimeout(conn, seq));
        }

        Outcome::Pending
    }

    fn release(
        &mut self,
        conn: ConnId,
        id: JobId,
        pri: u32,
        delay: u32,
        now: Instant,
    ) -> Response {
        if !self.holds(conn, id) {
            return Err(BeanstalkError::NotFound);
        }

        let delay = secs(delay);
        self.update_job(id, |job| {
            job.pri = pri;
            job.delay = delay;
            job.releases += 1;
            job.state = if delay.is_zero() {
                JobState::Ready
            } else {
                JobState::Delayed { until: now + delay }
            };
        });
        self.dispatch(now);

        Ok(BeanstalkResponse::Released)
    }

    fn bury(&mut self, conn: ConnId, id: JobId, pri: u32) -> Response {
        if !self.holds(conn, id) {
            return Err(BeanstalkError::NotFound);
        }

        let seq = self.next_seq();
        self.update_job(id, |job| {
            job.pri = pri;
            job.delay = Duration::ZERO;
            job.buries += 1;
            job.state = JobState::Buried { seq };
        });

        Ok(BeanstalkResponse::Buried)
    }

    fn delete(&mut self, conn: ConnId, id: JobId) -> Response {
        let holder = self
            .jobs
            .get(&id)
            .ok_or(BeanstalkError::NotFound)?
            .state
            .holder();
        if holder.is_some_and(|holder| holder != conn) {
            return Err(BeanstalkError::NotFound);
        }

        let job = self.jobs.remove(&id).ok_or(BeanstalkError::NotFound)?;
        cancel_wakes(&mut self.timers, id, job.state);
        if let Some(session) = holder.and_then(|h| self.sessions.get_mut(&h)) {
            session.held.remove(&id);
        }
        if let Some(tube) = self.tubes.get_mut(&job.tube) {
            tube.remove(&job);
            tube.cmd_delete += 1;
        }
        self.prune_tube(&job.tube);

        debug!(id, tube = %job.tube, "job deleted");
        Ok(BeanstalkResponse::Deleted)
    }

    fn touch(&mut self, conn: ConnId, id: JobId, now: Instant) -> Response {
        if !self.holds(conn, id) {
            return Err(BeanstalkError::NotFound);
        }

        self.update_job(id, |job| {
            job.state = JobState::Reserved {
                by: conn,
                deadline: now + job.ttr,
            }
        });

        Ok(BeanstalkResponse::Touched)
    }

    fn peek(&self, id: JobId) -> Response {
        self.jobs
            .get(&id)
            .map(|job| BeanstalkResponse::Found {
                id,
                data: job.data.clone(),
            })
            .ok_or(BeanstalkError::NotFound)
    }

    /// Peeks at the job `pick` chooses from the tube `conn` uses.
    fn peek_used(
        &self,
        conn: ConnId,
        pick: impl FnOnce(&Tube) -> Option<JobId>,
    ) -> Response {
        let used = &self.session(conn)?.used;
        let id = self
            .tubes
            .get(used)
            .and_then(pick)
            .ok_or(BeanstalkError::NotFound)?;

        self.peek(id)
    }

    /// Kicks up to `bound` buried jobs from the used tube, or if there are
    /// none, up to `bound` delayed jobs.
    fn kick(&mut self, conn: ConnId, bound: u64, now: Instant) -> Response {
        let used = &self.session(conn)?.used;
        let limit = usize::try_from(bound).unwrap_or(usize::MAX);

        let ids: Vec<JobId> = match self.tubes.get(used) {
            Some(tube) if !tube.buried.is_empty() => {
                tube.buried.iter().take(limit).map(|(_, id)| *id).collect()
            },
            Some(tube) => {
                tube.delayed.iter().take(limit).map(|(_, id)| *id).collect()
            },
            None => Vec::new(),
        };

        for id in &ids {
            self.update_job(*id, |job| {
                job.kicks += 1;
                job.state = JobState::Ready;
            });
        }
        self.dispatch(now);

        Ok(BeanstalkResponse::KickedCount {
            count: ids.len() as u64,
        })
    }

    fn kick_job(&mut self, id: JobId, now: Instant) -> Response {
        match self.jobs.get(&id).map(|job| job.state) {
            Some(JobState::Buried { .. } | JobState::Delayed { .. }) => {},
            _ => return Err(BeanstalkError::NotFound),
        }

        self.update_job(id, |job| {
            job.kicks += 1;
            job.state = JobState::Ready;
        });
        self.dispatch(now);

        Ok(BeanstalkResponse::Kicked)
    }

    fn use_tube(&mut self, conn: ConnId, name: String) -> Response {
        let session = self
            .sessions
            .get_mut(&conn)
            .ok_or(BeanstalkError::Internal)?;

        if session.used != name {
            self.tubes.ensure(&name).using += 1;

            let old = mem::replace(&mut session.used, name.clone());
            if let Some(tube) = self.tubes.get_mut(&old) {
                tube.using = tube.using.saturating_sub(1);
            }
            self.prune_tube(&old);
        }

        Ok(BeanstalkResponse::Using { tube: name })
    }

    fn watch(&mut self, conn: ConnId, name: String) -> Response {
        let session = self
            .sessions
            .get_mut(&conn)
            .ok_or(BeanstalkError::Internal)?;

        if !session.watches(&name) {
            self.tubes.ensure(&name).watching += 1;
            session.watched.push(name);
        }

        Ok(BeanstalkResponse::Watching {
            count: session.watched.len(),
        })
    }

    fn ignore(&mut self, conn: ConnId, name: String) -> Response {
        let session = self
            .sessions
            .get_mut(&conn)
            .ok_or(BeanstalkError::Internal)?;

        let Some(pos) = session.watched.iter().position(|n| *n == name) else {
            return Ok(BeanstalkResponse::Watching {
                count: session.watched.len(),
            });
        };
        if session.watched.len() == 1 {
            return Err(BeanstalkError::NotIgnored);
        }

        session.watched.remove(pos);
        let count = session.watched.len();

        if let Some(tube) = self.tubes.get_mut(&name) {
            tube.watching = tube.watching.saturating_sub(1);
        }
        self.prune_tube(&name);

        Ok(BeanstalkResponse::Watching { count })
    }

    fn pause_tube(&mut self, name: String, delay: u32, now: Instant) -> Response {
        let tube = self.tubes.get_mut(&name).ok_or(BeanstalkError::NotFound)?;
        tube.cmd_pause_tube += 1;

        if delay == 0 {
            tube.pause = None;
            self.timers.cancel(&Wake::PauseElapsed(name));
        } else {
            let duration = secs(delay);
            let until = now + duration;
            tube.pause = Some(Pause { duration, until });
            self.timers.schedule(until, Wake::PauseElapsed(name));
        }
        self.dispatch(now);

        Ok(BeanstalkResponse::Paused)
    }
}
