use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use net_exec::common::init_tracing;
use net_exec::config::{ExecConfig, ServerConfig};
use net_exec::net::executor::ShellExecutor;
use net_exec::net::listener::Listener;
use net_exec::net::session::SessionContext;

/// How long sessions and blocking jobs get to wind down once the
/// listener has stopped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_tracing(&config.log_filter)?;
    let exec = config.exec_config();

    // Shell commands run on the blocking pool, never on the reactor workers.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .max_blocking_threads(exec.max_jobs)
        .thread_name("net-shell-worker")
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let executor = Arc::new(ShellExecutor::new(exec.shell.clone()));
    let shutdown = shutdown_signal()?;
    let served = runtime.block_on(serve(&config, &exec, Arc::clone(&executor), shutdown));

    // A running child keeps its blocking job, and so the process, alive.
    let killed = executor.close();
    if killed > 0 {
        info!(killed, "killed running commands");
    }
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    if let Err(e) = &served {
        error!(error = %e, "server stopped with error");
    }
    served
}

async fn serve(
    config: &ServerConfig,
    exec: &ExecConfig,
    executor: Arc<ShellExecutor>,
    shutdown: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let shell = executor.shell().display().to_string();
    let ctx = Arc::new(SessionContext::new(executor, exec.max_jobs));
    let listener = Listener::bind(config.socket_addr(), ctx).await?;
    info!(
        threads = config.threads,
        max_jobs = exec.max_jobs,
        shell = %shell,
        "net_shell started"
    );

    listener
        .serve(async {
            let _ = shutdown.await;
        })
        .await?;
    Ok(())
}

/// Resolves the returned receiver on the first termination signal. A second
/// signal exits immediately.
fn shutdown_signal() -> anyhow::Result<oneshot::Receiver<()>> {
    let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
        .context("failed to install signal handlers")?;
    let (tx, rx) = oneshot::channel();
    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            let mut pending = signals.forever();
            if let Some(signal) = pending.next() {
                info!(signal, "shutdown signal received");
            }
            let _ = tx.send(());
            if let Some(signal) = pending.next() {
                warn!(signal, "second signal received, exiting now");
                process::exit(128 + signal);
            }
        })
        .context("failed to start signal listener")?;
    Ok(rx)
}
