use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Engine, Outcome, Request};
use crate::config::Config;
use crate::types::protocol::BeanstalkResponse;
use crate::types::ConnId;

/// The engine's answer to a request.
#[derive(Debug)]
pub(crate) enum Reply {
    Response(BeanstalkResponse),
    /// The connection should be closed without a response.
    Closed,
}

enum Message {
    Connect {
        reply: oneshot::Sender<ConnId>,
    },
    Request {
        conn: ConnId,
        request: Request,
        reply: oneshot::Sender<Reply>,
    },
    AbandonWait {
        conn: ConnId,
    },
    Disconnect {
        conn: ConnId,
    },
}

/// Submits work to the engine task. Cloning is cheap; every clone talks to
/// the same engine.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<Message>,
}

impl EngineHandle {
    /// Starts the engine on its own task. It runs until `cancel` fires or
    /// every handle is dropped.
    pub fn spawn(config: Config, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        let engine = Engine::new(config, Instant::now());

        tokio::spawn(run(engine, rx, cancel));

        Self { tx }
    }

    pub(crate) async fn connect(&self) -> Result<ConnId> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Connect { reply }).await?;
        rx.await.map_err(|_| anyhow!("engine stopped"))
    }

    /// Queues `request` for `conn`. The receiver resolves once the engine
    /// answers, which for a blocking reserve may take arbitrarily long.
    pub(crate) async fn submit(
        &self,
        conn: ConnId,
        request: Request,
    ) -> Result<oneshot::Receiver<Reply>> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Request {
            conn,
            request,
            reply,
        })
        .await?;
        Ok(rx)
    }

    /// Withdraws the blocked reserve of `conn`. Its reply resolves to
    /// [`Reply::Closed`] unless an answer was already on its way.
    pub(crate) async fn abandon_wait(&self, conn: ConnId) {
        let _ = self.send(Message::AbandonWait { conn }).await;
    }

    pub(crate) async fn disconnect(&self, conn: ConnId) {
        // A stopped engine has nothing left to clean up.
        let _ = self.send(Message::Disconnect { conn }).await;
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow!("engine stopped"))
    }
}

/// Far enough ahead to never fire.
fn never() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365)
}

async fn run(
    mut engine: Engine,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    info!("engine started");

    // Reply channels of connections blocked in a reserve.
    let mut pending: HashMap<ConnId, oneshot::Sender<Reply>> = HashMap::new();

    loop {
        let wake = engine.next_wake();

        select! {
            message = rx.recv() => match message {
                Some(message) => {
                    handle_message(&mut engine, &mut pending, message)
                },
                None => break,
            },
            _ = sleep_until(wake.unwrap_or_else(never)), if wake.is_some() => {
                engine.tick(Instant::now());
            },
            _ = cancel.cancelled() => break,
        }

        for (conn, response) in engine.take_deliveries() {
            if let Some(reply) = pending.remove(&conn) {
                // The receiver is gone only if the connection is closing, in
                // which case its disconnect returns the job.
                let _ = reply.send(Reply::Response(response));
            }
        }
    }

    debug!("engine stopped");
}

fn handle_message(
    engine: &mut Engine,
    pending: &mut HashMap<ConnId, oneshot::Sender<Reply>>,
    message: Message,
) {
    let now = Instant::now();

    match message {
        Message::Connect { reply } => {
            let conn = engine.connect();
            if reply.send(conn).is_err() {
                engine.disconnect(conn, now);
            }
        },
        Message::Request {
            conn,
            request,
            reply,
        } => match engine.handle(conn, request, now) {
            Outcome::Reply(response) => {
                let _ = reply.send(Reply::Response(response));
            },
            Outcome::Pending => {
                pending.insert(conn, reply);
            },
            Outcome::Closed => {
                let _ = reply.send(Reply::Closed);
            },
        },
        Message::AbandonWait { conn } => {
            if let Some(reply) = pending.remove(&conn) {
                engine.abandon_wait(conn);
                let _ = reply.send(Reply::Closed);
            }
        },
        Message::Disconnect { conn } => {
            pending.remove(&conn);
            engine.disconnect(conn, now);
        },
    }
}
