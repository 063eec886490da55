//! Runs one line of text through the system shell and captures what the
//! child writes to its stdout and stderr.
//!
//! Each call allocates its own three pipes and its own child, so the
//! executor is safe to call from many threads at once. The call blocks
//! for the whole lifetime of the child; async callers must keep it off
//! the reactor (see [`crate::net::session`]).
//!
//! The command text is handed to `<shell> -c` untouched. Anyone who can
//! reach the service can run anything the service user can.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::exports::CommandResult;

pub const DEFAULT_SHELL: &str = "/bin/bash";

const READ_CHUNK: usize = 256;

/// Something that can run a command line to completion.
pub trait Executor: Send + Sync {
    fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandResult, ExecError>;
}

/// Executes commands as `<shell> -c <command>` with piped stdio.
///
/// Every child leads its own process group. Clones share the set of groups
/// still running so [`ShellExecutor::close`] can reach them.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: PathBuf,
    running: Arc<Mutex<Running>>,
}

#[derive(Debug, Default)]
struct Running {
    groups: HashSet<i32>,
    closed: bool,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            running: Arc::new(Mutex::new(Running::default())),
        }
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Number of children spawned and not yet reaped.
    pub fn running_count(&self) -> usize {
        self.running().groups.len()
    }

    /// Refuses any further command and sends SIGKILL to the process group of
    /// every running child, so the shell and anything it started die
    /// together. Returns how many groups were signalled.
    pub fn close(&self) -> usize {
        let mut running = self.running();
        running.closed = true;
        running.groups.iter().filter(|&&pgid| kill_group(pgid)).count()
    }

    fn running(&self) -> MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn kill_group(pgid: i32) -> bool {
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            warn!(pgid, error = %e, "failed to kill command");
            false
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl Executor for ShellExecutor {
    fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandResult, ExecError> {
        if command.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        if self.running().closed {
            return Err(ExecError::Closed);
        }
        let started = Instant::now();

        // Parent ends are OwnedFd, so every early return below closes
        // whatever was opened so far.
        let input = open_pipe()?;
        let output = open_pipe()?;
        let errors = open_pipe()?;

        // The Command holds the child's ends; dropping it at the end of this
        // block closes the parent's copies so EOF is seen once the child exits.
        let mut child = {
            let mut cmd = Command::new(&self.shell);
            cmd.arg("-c")
                .arg(command)
                .process_group(0)
                .stdin(Stdio::from(input.read))
                .stdout(Stdio::from(output.write))
                .stderr(Stdio::from(errors.write));
            cmd.spawn().map_err(ExecError::Spawn)?
        };
        let pgid = child.id() as i32;
        {
            let mut running = self.running();
            if running.closed {
                // close() ran while this child was being spawned.
                kill_group(pgid);
            } else {
                running.groups.insert(pgid);
            }
        }

        let stdin_pipe = File::from(input.write);
        let stdout_pipe = File::from(output.read);
        let stderr_pipe = File::from(errors.read);

        let (fed, stdout, stderr) = thread::scope(|scope| {
            let feeder = match stdin {
                Some(data) => Some(scope.spawn(move || feed(stdin_pipe, data))),
                None => {
                    drop(stdin_pipe);
                    None
                }
            };
            let err_reader = scope.spawn(move || drain(stderr_pipe));
            let stdout = drain(stdout_pipe);
            let fed = feeder.map_or(Ok(()), join_worker);
            let stderr = join_worker(err_reader);
            (fed, stdout, stderr)
        });

        // Reap before looking at any pipe error so no zombie is left behind.
        let status = child.wait();
        self.running().groups.remove(&pgid);
        let status = status.map_err(ExecError::Io)?;
        fed.map_err(ExecError::Io)?;

        let mut result = CommandResult::new(command);
        result.stdout = stdout.map_err(ExecError::Io)?;
        result.stderr = stderr.map_err(ExecError::Io)?;
        match status.code() {
            Some(code) => result.exit_status = code,
            None => result.signal = status.signal(),
        }
        result.elapsed = started.elapsed();

        debug!(
            command,
            exit_status = result.exit_status,
            signal = ?result.signal,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "command finished"
        );
        Ok(result)
    }
}

struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn open_pipe() -> Result<Pipe, ExecError> {
    use nix::fcntl::OFlag;

    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(ExecError::Pipe)?;
    Ok(Pipe { read, write })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn open_pipe() -> Result<Pipe, ExecError> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let (read, write) = nix::unistd::pipe().map_err(ExecError::Pipe)?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(ExecError::Pipe)?;
    }
    Ok(Pipe { read, write })
}

/// Writes `data` to the child's stdin and closes it.
fn feed(mut pipe: File, data: &[u8]) -> io::Result<()> {
    match pipe.write_all(data) {
        // The child is free to exit without reading its input.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Reads until the write end is closed everywhere.
fn drain(mut pipe: File) -> io::Result<Vec<u8>> {
    let mut collected = Vec::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(collected)
}

fn join_worker<T>(handle: thread::ScopedJoinHandle<'_, io::Result<T>>) -> io::Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("pipe worker panicked")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> ShellExecutor {
        ShellExecutor::new("/bin/sh")
    }

    #[test]
    fn collects_output_larger_than_one_read() {
        let result = sh().run("seq 1 500", None).unwrap();
        let expected: String = (1..=500).map(|n| format!("{n}\n")).collect();
        assert!(expected.len() > READ_CHUNK);
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout, expected.as_bytes());
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn output_beyond_pipe_capacity_does_not_deadlock() {
        let result = sh().run("head -c 200000 /dev/zero", None).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.len(), 200_000);
        assert!(result.stdout.iter().all(|b| *b == 0));
    }

    #[test]
    fn reports_exit_code_and_stderr() {
        let result = sh().run("echo out; echo oops >&2; exit 3", None).unwrap();
        assert_eq!(result.exit_status, 3);
        assert_eq!(result.signal, None);
        assert_eq!(result.stdout, b"out\n");
        assert_eq!(result.stderr, b"oops\n");
        assert!(!result.success());
    }

    #[test]
    fn stdin_data_reaches_the_child() {
        let input = b"first line\nsecond line without newline";
        let result = sh().run("cat", Some(input)).unwrap();
        assert_eq!(result.stdout, input);
    }

    #[test]
    fn large_stdin_is_fed_while_output_drains() {
        let input: Vec<u8> = (0..300_000u32).map(|n| (n % 251) as u8).collect();
        let result = sh().run("cat", Some(&input)).unwrap();
        assert_eq!(result.stdout, input);
    }

    #[test]
    fn child_ignoring_stdin_is_not_an_error() {
        let input = vec![b'x'; 1 << 20];
        let result = sh().run("true", Some(&input)).unwrap();
        assert!(result.success());
    }

    #[test]
    fn without_stdin_the_child_sees_end_of_input() {
        let result = sh().run("cat; echo done", None).unwrap();
        assert_eq!(result.stdout, b"done\n");
    }

    #[test]
    fn shell_metacharacters_are_honoured() {
        let result = sh()
            .run("echo first; echo second | tr a-z A-Z && echo $((2 + 3))", None)
            .unwrap();
        assert_eq!(result.stdout, b"first\nSECOND\n5\n");
    }

    #[test]
    fn signaled_child_keeps_zero_status_and_records_signal() {
        let result = sh().run("kill -9 $$", None).unwrap();
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.signal, Some(9));
        assert!(!result.success());
    }

    #[test]
    fn missing_shell_is_a_spawn_error() {
        let err = ShellExecutor::new("/nonexistent/shell")
            .run("echo hi", None)
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn(_)), "{err:?}");
    }

    #[test]
    fn blank_command_is_rejected() {
        let err = sh().run("   ", None).unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[test]
    fn deterministic_command_is_repeatable() {
        let executor = sh();
        let first = executor.run("printf 'a\\nb\\n'", None).unwrap();
        let second = executor.run("printf 'a\\nb\\n'", None).unwrap();
        assert_eq!(first.stdout, b"a\nb\n");
        assert_eq!(first.stdout, second.stdout);
    }

    #[test]
    fn close_kills_running_commands_and_their_children() {
        let executor = sh();
        let worker = {
            let executor = executor.clone();
            thread::spawn(move || executor.run("sleep 30 & sleep 30; echo never", None))
        };

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while executor.running_count() == 0 {
            assert!(Instant::now() < deadline, "command never started");
            thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(executor.close(), 1);

        let result = worker.join().unwrap().unwrap();
        assert_eq!(result.signal, Some(9));
        assert!(result.stdout.is_empty());
        assert!(result.elapsed < std::time::Duration::from_secs(10));
        assert_eq!(executor.running_count(), 0);
    }

    #[test]
    fn closed_executor_refuses_new_commands() {
        let executor = sh();
        executor.run("true", None).unwrap();
        assert_eq!(executor.running_count(), 0);
        assert_eq!(executor.close(), 0);

        let err = executor.clone().run("echo late", None).unwrap_err();
        assert!(matches!(err, ExecError::Closed), "{err:?}");
    }

    #[test]
    fn result_keeps_the_command_text() {
        let result = sh().run("exit 0", None).unwrap();
        assert_eq!(result.command, "exit 0");
    }
}
