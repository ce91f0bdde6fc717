//! Serves the beanstalkd protocol over TCP, one task per connection.
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::Config;
use crate::engine::{EngineHandle, PutRejection, Reply, Request};
use crate::line_reader::LineReader;
use crate::parser::{ParsingError, MAX_LINE_LEN};
use crate::types::protocol::BeanstalkCommand;
use crate::types::serialisable::BeanstalkSerialisable;
use crate::types::ConnId;
use crate::util::bytes_to_human_str;

/// Accepts connections on `listener` until `cancel` fires, then waits for
/// every connection task to finish.
pub async fn serve(
    listener: TcpListener,
    engine: EngineHandle,
    config: Config,
    cancel: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    // Each connection task holds a clone of the sender; recv() returns None
    // once they've all gone.
    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);

    // Accept incoming connections until an exit signal is sent, and handle each
    // connection as its own task.
    loop {
        let conn = match select! {
            accept = listener.accept() => accept,
            _ = cancel.cancelled() => break,
        } {
            Ok((conn, _)) => conn,
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            },
        };

        tokio::spawn(begin_handle(
            engine.clone(),
            config.max_job_size,
            cancel.clone(),
            shutdown_hold.clone(),
            conn,
        ));
    }

    drop(shutdown_hold);
    shutdown_wait.recv().await;

    Ok(())
}

#[instrument(name = "handle", err, fields(peer = %conn.peer_addr()?), skip_all)]
async fn begin_handle(
    engine: EngineHandle,
    max_job_size: u32,
    cancel: CancellationToken,
    _shutdown_hold: mpsc::Sender<()>,
    mut conn: TcpStream,
) -> Result<()> {
    debug!("accepted connection");

    conn.set_nodelay(true).context("setting NODELAY")?;

    let conn_id = engine.connect().await?;
    let ret = handle_conn(&engine, conn_id, max_job_size, &cancel, &mut conn).await;
    engine.disconnect(conn_id).await;

    conn.shutdown().await.context("during shutdown")?;

    debug!("closed connection");

    ret
}

#[instrument(skip_all, fields(conn = conn_id))]
async fn handle_conn(
    engine: &EngineHandle,
    conn_id: ConnId,
    max_job_size: u32,
    cancel: &CancellationToken,
    conn: &mut TcpStream,
) -> Result<()> {
    // Split conn into read and write halves, where the read half uses our
    // LineReader. Anything longer than a command line can be is cut off and
    // rejected.
    let (r, mut w) = conn.split();
    let mut r = LineReader::with_max_line(r, MAX_LINE_LEN + 2);

    // Keep taking lines and parsing and processing them.
    loop {
        let line = select!(
           x = r.read_line() => match x? {
                Some(x) => x,
                None => return Ok(()),
           },
           _ = cancel.cancelled() => return Ok(()),
        );

        trace!(line = bytes_to_human_str(&line), "processing command");

        let parsed = match BeanstalkCommand::try_from(&line as &[u8]) {
            Ok(BeanstalkCommand::Put {
                pri,
                delay,
                ttr,
                n_bytes,
            }) => {
                let body = select! {
                    x = read_body(&mut r, n_bytes, max_job_size) => x?,
                    _ = cancel.cancelled() => return Ok(()),
                };
                match body {
                    Some(Ok(data)) => Ok(Request::Put {
                        pri,
                        delay,
                        ttr,
                        data,
                    }),
                    Some(Err(rejection)) => Ok(Request::RejectedPut(rejection)),
                    None => return Ok(()),
                }
            },
            Ok(cmd) => Ok(Request::Command(cmd)),
            // Counted as a put even though the body is left unread.
            Err(ParsingError::TrailingPutArgs) => {
                Ok(Request::RejectedPut(PutRejection::TrailingArgs))
            },
            Err(error) => Err(error),
        };

        let resp = match parsed {
            Ok(request) => {
                let blocking = matches!(
                    request,
                    Request::Command(
                        BeanstalkCommand::Reserve
                            | BeanstalkCommand::ReserveWithTimeout { .. }
                    )
                );
                let mut reply = engine.submit(conn_id, request).await?;

                // Only a reserve can block. While it does, watch for the peer
                // hanging up; anything it sends meanwhile stays buffered in r.
                // Other commands are answered even after the peer's EOF.
                let early = if blocking {
                    select! {
                        biased;
                        x = &mut reply => Some(x),
                        _ = r.wait_closed() => None,
                        _ = cancel.cancelled() => return Ok(()),
                    }
                } else {
                    None
                };

                let reply = match early {
                    Some(x) => x,
                    None => {
                        if blocking {
                            debug!("peer hung up during reserve");
                            engine.abandon_wait(conn_id).await;
                        }
                        select! {
                            x = reply => x,
                            _ = cancel.cancelled() => return Ok(()),
                        }
                    },
                };

                match reply.context("engine dropped request")? {
                    Reply::Response(resp) => resp.serialise_beanstalk(),
                    Reply::Closed => return Ok(()),
                }
            },
            Err(error) => {
                trace!(%error, "rejected command");
                error.serialise_beanstalk()
            },
        };

        // Slightly convoluted, but ensures we write out the buffer properly
        // with cancel safety.
        select! {
            x = w.write_all(&resp) => x?,
            _ = cancel.cancelled() => return Ok(()),
        };

        // Flush any buffered packets once we've written out the one or more
        // responses. This provides a pipelined response to a pipelined request.
        select! {
            x = w.flush() => x?,
            _ = cancel.cancelled() => return Ok(()),
        };
    }
}

/// Reads a job body of `n_bytes` plus its CRLF. Returns None if the peer
/// hangs up first. An oversized body is still consumed so the connection
/// stays in sync.
async fn read_body<T: AsyncRead + Unpin>(
    r: &mut LineReader<T>,
    n_bytes: u32,
    max_job_size: u32,
) -> Result<Option<Result<bytes::Bytes, PutRejection>>> {
    let n = n_bytes as usize;

    if n_bytes > max_job_size {
        let skipped = r.skip(n + 2).await?;
        return Ok(skipped.then_some(Err(PutRejection::TooBig)));
    }

    let Some(body) = r.read_exact(n + 2).await? else {
        return Ok(None);
    };

    if body.ends_with(b"\r\n") {
        Ok(Some(Ok(body.slice(..n))))
    } else {
        Ok(Some(Err(PutRejection::MissingCrlf)))
    }
}
