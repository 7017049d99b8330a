//! The non-blocking session abstraction a `CronTask` drives through
//! connect/send/result-drain (§4.6). The wire protocol client used to open
//! a real session against a target database is out of scope; this module
//! supplies the trait seam plus two implementations: `MockSession` for
//! state-machine unit tests, and `SqliteSession`, which executes a job's
//! command against this crate's own embedded store so the system is
//! runnable end-to-end without an external database.
//!
//! The poll-based shape (`Poll::Pending`/`Poll::Ready`, a `readiness()`
//! hint) mirrors the wire library's non-blocking handshake functions
//! (`PQconnectPoll`-style) described in §4.6, adapted from pg_cron's direct
//! socket polling to Rust's `std::task::Poll` vocabulary.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::Poll;

use rusqlite::Connection;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use cronq_core::job::JobDef;
use cronq_core::{CronError, Result};

/// What the event loop should wait on for a task mid-handshake, mirroring
/// `POLLIN`/`POLLOUT` in the literal pollfd model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    None,
    Read,
    Write,
}

/// One drained result from `poll_result`, classified per §4.6's "fatal
/// categories" rule.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Tuples,
    CommandOk,
    Empty,
    Fatal(String),
    Copy,
}

/// A non-blocking session to a target database, owned exclusively by one
/// `CronTask`.
pub trait Session: Send {
    fn poll_connect(&mut self) -> Poll<Result<()>>;
    fn poll_send(&mut self, command: &str) -> Poll<Result<()>>;
    /// Drains one outstanding result; `Ready(None)` means fully drained.
    fn poll_result(&mut self) -> Poll<Option<Result<SessionOutcome>>>;
    fn readiness(&self) -> Readiness;
}

/// Opens a `Session` for a job. Kept behind a trait so the task state
/// machine and event loop never depend on a concrete session type.
pub trait SessionFactory: Send + Sync {
    fn open(&self, job: &JobDef) -> Box<dyn Session>;
}

/// Scripted session used by the state-machine unit tests (§8 properties
/// 9-11): connect/send may be made to block for a configurable number of
/// polls, and results are replayed from a fixed queue.
pub struct MockSession {
    connect_polls_remaining: u32,
    send_polls_remaining: u32,
    connect_fails: bool,
    send_fails: bool,
    results: VecDeque<SessionOutcome>,
    never_connects: bool,
}

impl MockSession {
    pub fn immediate_success(results: Vec<SessionOutcome>) -> Self {
        MockSession {
            connect_polls_remaining: 0,
            send_polls_remaining: 0,
            connect_fails: false,
            send_fails: false,
            results: results.into(),
            never_connects: false,
        }
    }

    pub fn that_never_connects() -> Self {
        MockSession {
            connect_polls_remaining: 0,
            send_polls_remaining: 0,
            connect_fails: false,
            send_fails: false,
            results: VecDeque::new(),
            never_connects: true,
        }
    }

    pub fn with_connect_delay(polls: u32, results: Vec<SessionOutcome>) -> Self {
        MockSession {
            connect_polls_remaining: polls,
            send_polls_remaining: 0,
            connect_fails: false,
            send_fails: false,
            results: results.into(),
            never_connects: false,
        }
    }

    pub fn failing_to_connect() -> Self {
        MockSession {
            connect_polls_remaining: 0,
            send_polls_remaining: 0,
            connect_fails: true,
            send_fails: false,
            results: VecDeque::new(),
            never_connects: false,
        }
    }
}

impl Session for MockSession {
    fn poll_connect(&mut self) -> Poll<Result<()>> {
        if self.never_connects {
            return Poll::Pending;
        }
        if self.connect_polls_remaining > 0 {
            self.connect_polls_remaining -= 1;
            return Poll::Pending;
        }
        if self.connect_fails {
            return Poll::Ready(Err(CronError::ConnectFailed));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_send(&mut self, _command: &str) -> Poll<Result<()>> {
        if self.send_polls_remaining > 0 {
            self.send_polls_remaining -= 1;
            return Poll::Pending;
        }
        if self.send_fails {
            return Poll::Ready(Err(CronError::SendFailed));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_result(&mut self) -> Poll<Option<Result<SessionOutcome>>> {
        match self.results.pop_front() {
            Some(outcome) => Poll::Ready(Some(Ok(outcome))),
            None => Poll::Ready(None),
        }
    }

    fn readiness(&self) -> Readiness {
        if self.connect_polls_remaining > 0 || self.never_connects {
            Readiness::Write
        } else if self.send_polls_remaining > 0 {
            Readiness::Write
        } else {
            Readiness::Read
        }
    }
}

/// Always hands out `MockSession::immediate_success` with no results
/// (a bare `CommandOk`); tests that need scripted behavior construct a
/// `MockSession` directly instead of going through this factory.
pub struct MockSessionFactory;

impl SessionFactory for MockSessionFactory {
    fn open(&self, _job: &JobDef) -> Box<dyn Session> {
        Box::new(MockSession::immediate_success(vec![]))
    }
}

/// Runs a job's command against the crate's own embedded SQLite
/// connection, standing in for a real wire-protocol session. The command
/// executes on a blocking task (`rusqlite::Connection` is synchronous);
/// `poll_result` observes completion via a oneshot channel, which is the
/// cooperative, non-blocking analogue of watching a socket become
/// readable.
pub struct SqliteSession {
    conn: Arc<AsyncMutex<Connection>>,
    pending: Option<oneshot::Receiver<std::result::Result<(), String>>>,
}

impl SqliteSession {
    pub fn new(conn: Arc<AsyncMutex<Connection>>) -> Self {
        SqliteSession { conn, pending: None }
    }
}

impl Session for SqliteSession {
    fn poll_connect(&mut self) -> Poll<Result<()>> {
        // The embedded store has no handshake; connecting is instantaneous.
        Poll::Ready(Ok(()))
    }

    fn poll_send(&mut self, command: &str) -> Poll<Result<()>> {
        if self.pending.is_none() {
            let conn = Arc::clone(&self.conn);
            let command = command.to_string();
            let (tx, rx) = oneshot::channel();
            tokio::task::spawn_blocking(move || {
                let result = conn
                    .blocking_lock()
                    .execute_batch(&command)
                    .map_err(|e| e.to_string());
                let _ = tx.send(result);
            });
            self.pending = Some(rx);
        }
        Poll::Ready(Ok(()))
    }

    fn poll_result(&mut self) -> Poll<Option<Result<SessionOutcome>>> {
        let rx = match self.pending.as_mut() {
            Some(rx) => rx,
            None => return Poll::Ready(None),
        };

        match rx.try_recv() {
            Ok(Ok(())) => {
                self.pending = None;
                Poll::Ready(Some(Ok(SessionOutcome::CommandOk)))
            }
            Ok(Err(message)) => {
                self.pending = None;
                Poll::Ready(Some(Ok(SessionOutcome::Fatal(message))))
            }
            Err(oneshot::error::TryRecvError::Empty) => Poll::Pending,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending = None;
                Poll::Ready(Some(Err(CronError::ConnectionLost)))
            }
        }
    }

    fn readiness(&self) -> Readiness {
        if self.pending.is_some() {
            Readiness::Read
        } else {
            Readiness::None
        }
    }
}

pub struct SqliteSessionFactory {
    conn: Arc<AsyncMutex<Connection>>,
}

impl SqliteSessionFactory {
    pub fn new(conn: Arc<AsyncMutex<Connection>>) -> Self {
        SqliteSessionFactory { conn }
    }

    /// Opens its own connection to the database at `path`, independent of
    /// whichever connection the `JobStore` uses to manage job/run rows.
    /// WAL mode (set on the store's own connection at construction) allows
    /// both to operate concurrently.
    pub fn open(path: impl AsRef<std::path::Path>) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(SqliteSessionFactory {
            conn: Arc::new(AsyncMutex::new(conn)),
        })
    }
}

impl SessionFactory for SqliteSessionFactory {
    fn open(&self, _job: &JobDef) -> Box<dyn Session> {
        Box::new(SqliteSession::new(Arc::clone(&self.conn)))
    }
}
