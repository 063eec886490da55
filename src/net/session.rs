//! Per-connection command loop.
//!
//! A session greets the client, then repeatedly reads one line, answers it
//! and writes the whole answer before reading again. Only one operation is
//! ever outstanding on a connection, which keeps responses in request order
//! and keeps two callbacks for the same client from running at once.
//!
//! Shell commands are not run on the reactor. They go through
//! [`SessionContext::execute`], which waits for a job slot and hands the
//! blocking executor to tokio's blocking pool; the session just awaits the
//! completion.

use std::collections::VecDeque;
use std::fmt::Display;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{ExecError, SessionError};
use crate::exports::CommandResult;
use crate::net::executor::Executor;
use crate::net::router::{self, Action};

pub const GREETING: &str = "Connected to Telnet server!\nUse \"!help\" for help\n\n";
pub const HELP_TEXT: &str =
    "You can call shell command or use one of this:\n!date - Print time and date\n!stop - Close connection\n\n";
pub const SUCCESS_MARKER: &str = "Success!\n\n";
pub const FAILURE_MARKER: &str = "Something went wrong\n\n";

/// Longest accepted input line, terminator included. A client that sends
/// more without a line feed loses its connection.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// `ctime(3)` layout, e.g. `Fri Oct  9 08:05:03 2026`.
const DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// State shared by every session of one listener.
pub struct SessionContext {
    executor: Arc<dyn Executor>,
    jobs: Arc<Semaphore>,
}

impl SessionContext {
    /// `max_jobs` bounds how many shell commands run at the same time
    /// across all sessions.
    pub fn new(executor: Arc<dyn Executor>, max_jobs: usize) -> Self {
        Self {
            executor,
            jobs: Arc::new(Semaphore::new(max_jobs.max(1))),
        }
    }

    /// Runs `command` on the blocking pool once a job slot is free.
    pub async fn execute(&self, command: &str) -> Result<CommandResult, ExecError> {
        let permit = Arc::clone(&self.jobs)
            .acquire_owned()
            .await
            .map_err(|e| ExecError::Worker(e.to_string()))?;
        let executor = Arc::clone(&self.executor);
        let command = command.to_owned();
        tokio::task::spawn_blocking(move || {
            // Held until the child is gone, even if the session is not.
            let _permit = permit;
            executor.run(&command, None)
        })
        .await
        .map_err(|e| ExecError::Worker(e.to_string()))?
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Greeting,
    Reading,
    Dispatching(String),
    Writing,
    Closed,
}

pub struct Session<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    inbound: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    ctx: Arc<SessionContext>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, ctx: Arc<SessionContext>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            inbound: Vec::new(),
            pending: VecDeque::new(),
            ctx,
        }
    }

    /// Drives the session until the client leaves, sends `!stop`, or the
    /// transport fails. The transport is closed before this returns.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut state = State::Greeting;
        let outcome = loop {
            if state == State::Closed {
                break Ok(());
            }
            match self.step(state).await {
                Ok(next) => state = next,
                Err(e) => break Err(e),
            }
        };
        self.close().await;
        outcome
    }

    async fn step(&mut self, state: State) -> Result<State, SessionError> {
        match state {
            State::Greeting => {
                self.queue(GREETING);
                Ok(State::Writing)
            }
            State::Reading => self.read_line().await,
            State::Dispatching(line) => Ok(self.dispatch(&line).await),
            State::Writing => {
                self.flush_pending().await?;
                Ok(State::Reading)
            }
            State::Closed => Ok(State::Closed),
        }
    }

    async fn read_line(&mut self) -> Result<State, SessionError> {
        self.inbound.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut self.inbound)
            .await?;
        if n == 0 {
            debug!("peer closed connection");
            return Ok(State::Closed);
        }
        if self.inbound.last() != Some(&b'\n') {
            if n >= MAX_LINE_BYTES {
                warn!(limit = MAX_LINE_BYTES, "input line too long");
                return Err(SessionError::Transport(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line longer than {MAX_LINE_BYTES} bytes"),
                )));
            }
            debug!(bytes = n, "discarding unterminated line at end of stream");
            return Ok(State::Closed);
        }
        let line = String::from_utf8_lossy(&self.inbound).trim().to_string();
        if line.is_empty() {
            Ok(State::Reading)
        } else {
            Ok(State::Dispatching(line))
        }
    }

    async fn dispatch(&mut self, line: &str) -> State {
        match router::dispatch(line) {
            Action::ShowHelp => self.queue(HELP_TEXT),
            Action::ShowDate => self.queue(format!("{}\n\n", render_date(&Local::now()))),
            Action::Disconnect => {
                info!("client requested disconnect");
                return State::Closed;
            }
            Action::RunShell(command) => {
                debug!(command, "dispatching to shell");
                let outcome = self.ctx.execute(command).await;
                self.queue_outcome(command, outcome);
            }
        }
        State::Writing
    }

    fn queue_outcome(&mut self, command: &str, outcome: Result<CommandResult, ExecError>) {
        match outcome {
            Ok(result) if result.success() => {
                self.queue(SUCCESS_MARKER);
                self.queue(with_newline(result.stdout));
            }
            Ok(result) => {
                info!(
                    command,
                    exit_status = result.exit_status,
                    signal = ?result.signal,
                    "command failed"
                );
                self.queue(FAILURE_MARKER);
                self.queue(with_newline(result.stderr));
            }
            Err(e) => {
                warn!(command, error = %e, "command could not be run");
                self.queue(FAILURE_MARKER);
                self.queue(format!("{e}\n"));
            }
        }
    }

    fn queue(&mut self, bytes: impl Into<Vec<u8>>) {
        self.pending.push_back(bytes.into());
    }

    async fn flush_pending(&mut self) -> Result<(), SessionError> {
        while let Some(buffer) = self.pending.pop_front() {
            self.writer.write_all(&buffer).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.pending.clear();
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "shutdown after close failed");
        }
    }
}

pub fn render_date<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format(DATE_FORMAT).to_string()
}

fn with_newline(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.push(b'\n');
    bytes
}
