use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use crate::error::ConfigError;
use crate::net::executor::DEFAULT_SHELL;

/// Command-line configuration for the `net_shell` server.
#[derive(Debug, Clone, Parser)]
#[command(name = "net_shell", about = "Run each received line as a shell command")]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,

    /// Number of worker threads driving the connection reactor.
    #[arg(value_parser = parse_count)]
    pub threads: usize,

    /// Interface address to bind.
    #[arg(long, env = "NET_SHELL_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Shell used as `<shell> -c <command>`.
    #[arg(long, env = "NET_SHELL_SHELL", default_value = DEFAULT_SHELL)]
    pub shell: PathBuf,

    /// Maximum number of commands running at once; defaults to THREADS.
    #[arg(long, env = "NET_SHELL_MAX_JOBS", value_parser = parse_count)]
    pub max_jobs: Option<usize>,

    /// Log filter directive, e.g. `info` or `net_exec=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs.unwrap_or(self.threads)
    }

    pub fn exec_config(&self) -> ExecConfig {
        ExecConfig {
            shell: self.shell.clone(),
            max_jobs: self.max_jobs(),
        }
    }
}

/// Settings for running shell commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    pub shell: PathBuf,
    /// Upper bound on commands running at the same time.
    pub max_jobs: usize,
}

/// Command-line configuration for the `net_client` tool.
#[derive(Debug, Clone, Parser)]
#[command(name = "net_client", about = "Interactive client for net_shell")]
pub struct ClientConfig {
    /// Server address as HOST:PORT.
    #[arg(long, env = "CONNECT_ADDRESS", default_value = "127.0.0.1:8080")]
    pub address: String,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,
}

fn parse_count(raw: &str) -> Result<usize, ConfigError> {
    let count: usize = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidCount(raw.to_string()))?;
    if count == 0 {
        return Err(ConfigError::ZeroCount);
    }
    Ok(count)
}
