use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tubeq::config::Config;
use tubeq::engine::EngineHandle;
use tubeq::server;

const PATIENCE: Duration = Duration::from_secs(5);

struct Server {
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl Server {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let engine = EngineHandle::spawn(config.clone(), cancel.clone());

        tokio::spawn(server::serve(listener, engine, config, cancel.clone()));

        Self { addr, cancel }
    }

    async fn client(&self) -> Client {
        let (r, w) = TcpStream::connect(self.addr).await.unwrap().into_split();
        Client {
            r: BufReader::new(r),
            w,
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Client {
    r: BufReader<OwnedReadHalf>,
    w: OwnedWriteHalf,
}

impl Client {
    async fn send(&mut self, raw: &[u8]) {
        self.w.write_all(raw).await.unwrap();
    }

    /// Reads one response line without its CRLF.
    async fn line(&mut self) -> String {
        let mut line = Vec::new();
        timeout(PATIENCE, self.r.read_until(b'\n', &mut line))
            .await
            .expect("no response")
            .unwrap();
        assert!(line.ends_with(b"\r\n"), "unterminated line {line:?}");
        line.truncate(line.len() - 2);
        String::from_utf8(line).unwrap()
    }

    /// Reads a body of `n` bytes and its CRLF.
    async fn body(&mut self, n: usize) -> Vec<u8> {
        let mut body = vec![0; n + 2];
        timeout(PATIENCE, self.r.read_exact(&mut body))
            .await
            .expect("no body")
            .unwrap();
        assert_eq!(&body[n..], b"\r\n");
        body.truncate(n);
        body
    }

    async fn cmd(&mut self, cmd: &str) -> String {
        self.send(format!("{cmd}\r\n").as_bytes()).await;
        self.line().await
    }

    async fn put(&mut self, pri: u32, delay: u32, ttr: u32, data: &str) -> String {
        let raw = format!("put {pri} {delay} {ttr} {}\r\n{data}\r\n", data.len());
        self.send(raw.as_bytes()).await;
        self.line().await
    }

    /// Sends `cmd` and reads a YAML payload framed as `OK <n>`.
    async fn yaml(&mut self, cmd: &str) -> String {
        let header = self.cmd(cmd).await;
        let n: usize = header
            .strip_prefix("OK ")
            .unwrap_or_else(|| panic!("unexpected {header}"))
            .parse()
            .unwrap();
        String::from_utf8(self.body(n).await).unwrap()
    }

    /// Returns the value of `key` in a YAML stats payload.
    async fn stat(&mut self, cmd: &str, key: &str) -> String {
        let yaml = self.yaml(cmd).await;
        yaml.lines()
            .find_map(|line| line.strip_prefix(&format!("{key}: ")))
            .unwrap_or_else(|| panic!("{key} missing from {yaml}"))
            .trim_matches('"')
            .to_owned()
    }

    /// True once the server has closed the connection.
    async fn closed(&mut self) -> bool {
        let mut buf = [0; 1];
        matches!(timeout(PATIENCE, self.r.read(&mut buf)).await, Ok(Ok(0)))
    }

    /// Half-closes the connection and reads whatever the server still sends.
    async fn finish(mut self) -> String {
        self.w.shutdown().await.unwrap();

        let mut rest = Vec::new();
        timeout(PATIENCE, self.r.read_to_end(&mut rest))
            .await
            .expect("connection left open")
            .unwrap();
        String::from_utf8(rest).unwrap()
    }
}

#[tokio::test]
async fn test_put_reserve_delete() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    assert_eq!(c.put(5, 0, 10, "hello").await, "INSERTED 1");

    assert_eq!(c.cmd("peek 1").await, "FOUND 1 5");
    assert_eq!(c.body(5).await, b"hello");

    assert_eq!(c.cmd("reserve").await, "RESERVED 1 5");
    assert_eq!(c.body(5).await, b"hello");
    assert_eq!(c.stat("stats-job 1", "state").await, "reserved");

    assert_eq!(c.cmd("delete 1").await, "DELETED");
    assert_eq!(c.cmd("delete 1").await, "NOT_FOUND");
    assert_eq!(c.cmd("peek 1").await, "NOT_FOUND");

    assert_eq!(c.stat("stats", "cmd-delete").await, "2");
    assert_eq!(c.stat("stats-tube default", "cmd-delete").await, "1");
    assert_eq!(c.stat("stats", "total-jobs").await, "1");
}

#[tokio::test]
async fn test_binary_body_round_trips() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    let data = b"a\r\nb\0\xff\r\n";
    c.send(format!("put 0 0 10 {}\r\n", data.len()).as_bytes())
        .await;
    c.send(data).await;
    c.send(b"\r\n").await;
    assert_eq!(c.line().await, "INSERTED 1");

    assert_eq!(c.cmd("reserve-with-timeout 0").await, "RESERVED 1 8");
    assert_eq!(c.body(data.len()).await, data);
}

#[tokio::test]
async fn test_pipelined_commands() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    c.send(b"use a\r\nput 1 0 10 1\r\nx\r\nlist-tube-used\r\n")
        .await;
    assert_eq!(c.line().await, "USING a");
    assert_eq!(c.line().await, "INSERTED 1");
    assert_eq!(c.line().await, "USING a");
}

#[tokio::test]
async fn test_malformed_lines() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    assert_eq!(c.cmd("frobnicate").await, "UNKNOWN_COMMAND");
    assert_eq!(c.cmd("put 0 0 10").await, "BAD_FORMAT");
    assert_eq!(c.cmd("use").await, "UNKNOWN_COMMAND");
    assert_eq!(c.cmd("use -bad").await, "BAD_FORMAT");
    assert_eq!(c.cmd(&format!("use {}", "a".repeat(201))).await, "BAD_FORMAT");

    // The connection is still usable afterwards.
    assert_eq!(c.cmd("list-tube-used").await, "USING default");
}

#[tokio::test]
async fn test_overlong_line_is_rejected() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    let line = format!("use {}", "a".repeat(300));
    let reply = c.cmd(&line).await;
    assert!(
        reply == "BAD_FORMAT" || reply == "UNKNOWN_COMMAND",
        "unexpected {reply}"
    );

    // A fresh connection is unaffected.
    let mut other = server.client().await;
    assert_eq!(other.cmd("list-tube-used").await, "USING default");
}

#[tokio::test]
async fn test_put_framing_errors() {
    let config = Config {
        max_job_size: 4,
        ..Config::default()
    };
    let server = Server::start(config).await;
    let mut c = server.client().await;

    assert_eq!(c.put(0, 0, 10, "hello").await, "JOB_TOO_BIG");
    assert_eq!(c.put(0, 0, 10, "abcd").await, "INSERTED 1");

    c.send(b"put 0 0 10 2\r\nabcd").await;
    assert_eq!(c.line().await, "EXPECTED_CRLF");

    let mut other = server.client().await;
    assert_eq!(other.stat("stats", "cmd-put").await, "3");
    assert_eq!(other.stat("stats", "current-jobs-ready").await, "1");
}

#[tokio::test]
async fn test_watch_and_priority() {
    let server = Server::start(Config::default()).await;
    let mut producer = server.client().await;
    let mut worker = server.client().await;

    assert_eq!(producer.cmd("use emails").await, "USING emails");
    assert_eq!(producer.put(10, 0, 10, "low").await, "INSERTED 1");
    assert_eq!(producer.put(1, 0, 10, "high").await, "INSERTED 2");

    assert_eq!(worker.cmd("reserve-with-timeout 0").await, "TIMED_OUT");
    assert_eq!(worker.cmd("watch emails").await, "WATCHING 2");
    assert_eq!(worker.cmd("ignore default").await, "WATCHING 1");
    assert_eq!(worker.cmd("ignore emails").await, "NOT_IGNORED");

    assert_eq!(worker.cmd("reserve").await, "RESERVED 2 4");
    assert_eq!(worker.body(4).await, b"high");

    assert_eq!(
        worker.yaml("list-tubes-watched").await,
        "---\n- emails\n"
    );
    assert_eq!(
        worker.yaml("list-tubes").await,
        "---\n- default\n- emails\n"
    );
}

#[tokio::test]
async fn test_blocked_workers_served_in_arrival_order() {
    let server = Server::start(Config::default()).await;
    let mut first = server.client().await;
    let mut second = server.client().await;
    let mut producer = server.client().await;

    // Blocked reserves have no reply to wait on, so order them by time.
    first.send(b"reserve\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    second.send(b"reserve\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(producer.stat("stats", "current-waiting").await, "2");

    assert_eq!(producer.put(0, 0, 10, "a").await, "INSERTED 1");
    assert_eq!(first.line().await, "RESERVED 1 1");
    assert_eq!(first.body(1).await, b"a");

    assert_eq!(producer.put(0, 0, 10, "b").await, "INSERTED 2");
    assert_eq!(second.line().await, "RESERVED 2 1");
    assert_eq!(second.body(1).await, b"b");
}

#[tokio::test]
async fn test_deadline_soon_wakes_blocked_reserve() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    assert_eq!(c.put(0, 0, 2, "x").await, "INSERTED 1");
    assert_eq!(c.cmd("reserve").await, "RESERVED 1 1");
    c.body(1).await;

    let started = Instant::now();
    assert_eq!(c.cmd("reserve").await, "DEADLINE_SOON");
    assert!(started.elapsed() >= Duration::from_millis(500));

    assert_eq!(c.cmd("touch 1").await, "TOUCHED");
    assert_eq!(c.cmd("release 1 0 0").await, "RELEASED");
}

#[tokio::test]
async fn test_ttr_expiry_returns_job() {
    let server = Server::start(Config::default()).await;
    let mut holder = server.client().await;
    let mut other = server.client().await;

    assert_eq!(holder.put(0, 0, 1, "x").await, "INSERTED 1");
    assert_eq!(holder.cmd("reserve").await, "RESERVED 1 1");
    holder.body(1).await;

    assert_eq!(other.cmd("reserve-with-timeout 3").await, "RESERVED 1 1");
    other.body(1).await;

    assert_eq!(holder.cmd("delete 1").await, "NOT_FOUND");
    assert_eq!(other.stat("stats-job 1", "timeouts").await, "1");
    assert_eq!(other.stat("stats", "job-timeouts").await, "1");
}

#[tokio::test]
async fn test_pause_tube_holds_jobs() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    assert_eq!(c.put(0, 0, 10, "x").await, "INSERTED 1");
    assert_eq!(c.cmd("pause-tube default 1").await, "PAUSED");
    assert_eq!(c.cmd("reserve-with-timeout 0").await, "TIMED_OUT");
    assert_eq!(c.stat("stats-tube default", "pause").await, "1");

    let started = Instant::now();
    assert_eq!(c.cmd("reserve").await, "RESERVED 1 1");
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(c.cmd("pause-tube nosuch 1").await, "NOT_FOUND");
}

#[tokio::test]
async fn test_bury_and_kick() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    assert_eq!(c.put(0, 0, 10, "x").await, "INSERTED 1");
    assert_eq!(c.cmd("reserve").await, "RESERVED 1 1");
    c.body(1).await;
    assert_eq!(c.cmd("bury 1 7").await, "BURIED");
    assert_eq!(c.cmd("peek-buried").await, "FOUND 1 1");
    c.body(1).await;

    assert_eq!(c.cmd("kick 10").await, "KICKED 1");
    assert_eq!(c.cmd("peek-ready").await, "FOUND 1 1");
    c.body(1).await;
    assert_eq!(c.stat("stats-job 1", "pri").await, "7");
    assert_eq!(c.cmd("kick-job 1").await, "NOT_FOUND");
}

#[tokio::test]
async fn test_quit_closes_connection() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    c.send(b"quit\r\n").await;
    assert!(c.closed().await);
}

#[tokio::test]
async fn test_disconnect_releases_reserved_jobs() {
    let server = Server::start(Config::default()).await;
    let mut holder = server.client().await;
    let mut other = server.client().await;

    assert_eq!(holder.put(0, 0, 100, "x").await, "INSERTED 1");
    assert_eq!(holder.cmd("reserve").await, "RESERVED 1 1");
    holder.body(1).await;
    drop(holder);

    assert_eq!(other.cmd("reserve-with-timeout 2").await, "RESERVED 1 1");
    other.body(1).await;
    assert_eq!(other.stat("stats-job 1", "releases").await, "0");
}

#[tokio::test]
async fn test_disconnect_while_blocked() {
    let server = Server::start(Config::default()).await;
    let mut waiter = server.client().await;
    let mut producer = server.client().await;

    waiter.send(b"reserve\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(waiter);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(producer.stat("stats", "current-waiting").await, "0");
    assert_eq!(producer.put(0, 0, 10, "x").await, "INSERTED 1");
    assert_eq!(producer.stat("stats", "current-jobs-ready").await, "1");
}

#[tokio::test]
async fn test_replies_survive_half_close() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    let mut expected = String::new();
    for i in 1..=20 {
        c.send(format!("put 0 0 10 1\r\n{}\r\n", i % 10).as_bytes()).await;
        expected.push_str(&format!("INSERTED {i}\r\n"));
    }
    c.send(b"list-tube-used\r\n").await;
    expected.push_str("USING default\r\n");

    assert_eq!(c.finish().await, expected);
}

#[tokio::test]
async fn test_reserve_answered_after_half_close() {
    let server = Server::start(Config::default()).await;
    let mut c = server.client().await;

    c.send(b"put 0 0 10 2\r\nhi\r\nreserve\r\nstats-job 1\r\n").await;
    let rest = c.finish().await;

    assert!(
        rest.starts_with("INSERTED 1\r\nRESERVED 1 2\r\nhi\r\nOK "),
        "unexpected {rest:?}"
    );
    assert!(rest.contains("state: reserved"), "unexpected {rest:?}");
}

#[tokio::test]
async fn test_half_close_while_blocked() {
    let server = Server::start(Config::default()).await;
    let mut waiter = server.client().await;
    let mut producer = server.client().await;

    waiter.send(b"reserve\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Giving up on a blocked reserve closes the connection unanswered.
    assert_eq!(waiter.finish().await, "");

    assert_eq!(producer.stat("stats", "current-waiting").await, "0");
    assert_eq!(producer.put(0, 0, 10, "x").await, "INSERTED 1");
    assert_eq!(producer.stat("stats", "current-jobs-ready").await, "1");
}
