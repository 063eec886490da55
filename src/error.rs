//! Error types shared by the executor, the session loop and the listener.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures raised while running a command through the shell.
///
/// None of these end a session: the session renders them as a failure
/// response and keeps reading.
#[derive(Debug, Error)]
pub enum ExecError {
    /// One of the three stdio pipes could not be allocated.
    #[error("failed to allocate pipe: {0}")]
    Pipe(#[source] nix::Error),
    /// The shell process could not be started.
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] io::Error),
    /// Feeding input to, reading output from, or reaping the child failed.
    #[error("i/o error while talking to child: {0}")]
    Io(#[source] io::Error),
    #[error("command is empty")]
    EmptyCommand,
    /// The executor was closed for shutdown.
    #[error("server is shutting down")]
    Closed,
    /// The blocking job never reported back (cancelled or panicked).
    #[error("command worker failed: {0}")]
    Worker(String),
}

/// A session ends with this when its transport breaks.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Problems with command-line or environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{0}` is not a valid count")]
    InvalidCount(String),
    #[error("count must be at least 1")]
    ZeroCount,
    #[error("invalid log filter: {0}")]
    LogFilter(String),
    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),
}
