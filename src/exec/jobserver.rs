//! GNU-make-compatible job token broker.
//!
//! Bounds how many build and test subprocesses may run at once. When a
//! recursive-make jobserver is advertised through `MAKEFLAGS`, this broker
//! joins it as a client; otherwise it creates its own token pipe and
//! advertises it to child processes, so nested build tools (ninja in
//! particular) can share the same global budget.
//!
//! The protocol is a pipe holding one byte per free job slot: acquiring a
//! slot is a blocking one-byte read, releasing it writes the byte back.
//! The slot implicitly held by the process itself is never written into
//! the pipe.

use std::os::unix::io::RawFd;
use std::process::{Child, ChildStderr, ChildStdout, ExitStatus, Stdio};
use std::sync::Arc;

use crate::errors::BuildError;
use crate::exec::fd;
use crate::exec::process::ProcessBuilder;

const MAKEFLAGS: &str = "MAKEFLAGS";

/// Parse the jobserver descriptor pair out of a MAKEFLAGS value.
///
/// Recognizes both the current `--jobserver-auth=R,W` spelling and the
/// older `--jobserver-fds=R,W` one.
pub fn parse_jobserver_auth(makeflags: &str) -> Option<(RawFd, RawFd)> {
    for word in makeflags.split_whitespace() {
        let Some(spec) = word
            .strip_prefix("--jobserver-auth=")
            .or_else(|| word.strip_prefix("--jobserver-fds="))
        else {
            continue;
        };
        let (read, write) = spec.split_once(',')?;
        let read: RawFd = read.parse().ok()?;
        let write: RawFd = write.parse().ok()?;
        if read < 0 || write < 0 {
            return None;
        }
        return Some((read, write));
    }
    None
}

struct BrokerShared {
    read_fd: RawFd,
    write_fd: RawFd,
    /// Whether this broker created the pipe (standalone mode) and must
    /// close it. A delegated broker borrows descriptors owned by the
    /// parent make process.
    owns_pipe: bool,
    /// MAKEFLAGS value advertised to every spawned child.
    makeflags: String,
}

impl Drop for BrokerShared {
    fn drop(&mut self) {
        if self.owns_pipe {
            fd::close(self.read_fd);
            fd::close(self.write_fd);
        }
    }
}

/// Process-wide gate on subprocess parallelism.
#[derive(Clone)]
pub struct JobBroker {
    shared: Arc<BrokerShared>,
}

impl JobBroker {
    /// Join the jobserver advertised through the `MAKEFLAGS` environment
    /// variable.
    ///
    /// Fails when no jobserver is advertised or its descriptors are not
    /// open in this process; the caller is expected to fall back to
    /// [`JobBroker::standalone`].
    pub fn from_environ() -> Result<Self, BuildError> {
        let makeflags = std::env::var(MAKEFLAGS)
            .map_err(|_| BuildError::Resource("no MAKEFLAGS in the environment".into()))?;
        Self::from_makeflags(&makeflags)
    }

    /// Join the jobserver advertised by the given MAKEFLAGS value.
    pub fn from_makeflags(makeflags: &str) -> Result<Self, BuildError> {
        let (read_fd, write_fd) = parse_jobserver_auth(makeflags).ok_or_else(|| {
            BuildError::Resource(format!("no jobserver advertised in MAKEFLAGS ({})", makeflags))
        })?;
        if !fd::fd_is_valid(read_fd) || !fd::fd_is_valid(write_fd) {
            return Err(BuildError::Resource(format!(
                "jobserver descriptors {},{} are not open",
                read_fd, write_fd
            )));
        }
        Ok(JobBroker {
            shared: Arc::new(BrokerShared {
                read_fd,
                write_fd,
                owns_pipe: false,
                makeflags: makeflags.to_string(),
            }),
        })
    }

    /// Create a standalone broker of the given capacity (defaulting to
    /// the host's logical CPU count) and advertise it to children.
    pub fn standalone(jobs: Option<usize>) -> Result<Self, BuildError> {
        let jobs = jobs
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1);

        let (read_fd, write_fd) = fd::pipe()?;
        for _ in 0..jobs {
            fd::write_byte(write_fd, b'+')?;
        }

        let makeflags = format!("-j{} --jobserver-auth={},{}", jobs, read_fd, write_fd);
        Ok(JobBroker {
            shared: Arc::new(BrokerShared {
                read_fd,
                write_fd,
                owns_pipe: true,
                makeflags,
            }),
        })
    }

    /// Block until a job slot is free and take it.
    ///
    /// A zero-byte read means the far end of the jobserver pipe went
    /// away; that is fatal rather than a condition to wait out.
    pub fn acquire(&self) -> Result<JobToken, BuildError> {
        match fd::read_byte(self.shared.read_fd)? {
            Some(byte) => Ok(JobToken {
                shared: Arc::clone(&self.shared),
                byte,
            }),
            None => Err(BuildError::Resource(
                "jobserver pipe closed (EOF while waiting for a job slot)".into(),
            )),
        }
    }

    /// Spawn a subprocess under this broker's budget.
    ///
    /// With `claim_job` a token is acquired first and released
    /// automatically once the child is reaped; build tools that re-enter
    /// the jobserver protocol themselves (ninja) are spawned without a
    /// claim. With `capture` the child's stdout/stderr are piped so they
    /// can be registered with the output multiplexer.
    ///
    /// The call never blocks on process completion. A spawn failure
    /// releases the token immediately and is surfaced synchronously.
    pub fn popen(
        &self,
        cmd: &ProcessBuilder,
        claim_job: bool,
        capture: bool,
    ) -> Result<ChildHandle, BuildError> {
        let token = if claim_job { Some(self.acquire()?) } else { None };

        let mut command = cmd.build_command();
        command.env(MAKEFLAGS, &self.shared.makeflags);
        command.stdin(Stdio::null());
        if capture {
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
        }

        match command.spawn() {
            Ok(child) => Ok(ChildHandle {
                child,
                token,
                command: cmd.display_command(),
            }),
            // `token` drops here, putting the slot straight back.
            Err(source) => Err(BuildError::Spawn {
                command: cmd.display_command(),
                source,
            }),
        }
    }
}

/// One unit of permission to run a subprocess.
///
/// Linear: the slot goes back into the pipe exactly once, when the token
/// is dropped.
pub struct JobToken {
    shared: Arc<BrokerShared>,
    byte: u8,
}

impl JobToken {
    /// Explicitly give the slot back.
    pub fn release(self) {}
}

impl Drop for JobToken {
    fn drop(&mut self) {
        if let Err(err) = fd::write_byte(self.shared.write_fd, self.byte) {
            tracing::warn!("failed to return job token: {}", err);
        }
    }
}

/// A spawned subprocess plus the job token it holds.
pub struct ChildHandle {
    child: Child,
    token: Option<JobToken>,
    command: String,
}

impl ChildHandle {
    /// The rendered command line, for diagnostics.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Take the captured stdout stream, if any.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the captured stderr stream, if any.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the child to exit and release its job token.
    pub fn wait(&mut self) -> Result<ExitStatus, BuildError> {
        let status = self.child.wait();
        // The child is reaped (or beyond reaping); either way the slot
        // must go back.
        self.token.take();
        Ok(status?)
    }

    /// Wait for the child and fail on a non-zero exit.
    pub fn expect_success(&mut self) -> Result<(), BuildError> {
        let status = self.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(BuildError::ProcessFailure {
                command: self.command.clone(),
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_parse_jobserver_auth() {
        assert_eq!(parse_jobserver_auth("-j8 --jobserver-auth=3,4"), Some((3, 4)));
        assert_eq!(parse_jobserver_auth("--jobserver-fds=5,6 -j"), Some((5, 6)));
        assert_eq!(parse_jobserver_auth("-j8"), None);
        assert_eq!(parse_jobserver_auth(""), None);
        assert_eq!(parse_jobserver_auth("--jobserver-auth=x,y"), None);
        assert_eq!(parse_jobserver_auth("--jobserver-auth=-1,-1"), None);
    }

    #[test]
    fn test_standalone_advertises_itself() {
        let broker = JobBroker::standalone(Some(3)).unwrap();
        let flags = &broker.shared.makeflags;
        assert!(flags.starts_with("-j3 "));
        let (r, w) = parse_jobserver_auth(flags).unwrap();
        assert_eq!((r, w), (broker.shared.read_fd, broker.shared.write_fd));
    }

    #[test]
    fn test_from_makeflags_rejects_bad_fds() {
        // Descriptors far beyond anything open in a test process.
        assert!(JobBroker::from_makeflags("--jobserver-auth=960,961").is_err());
        assert!(JobBroker::from_makeflags("-j4").is_err());
    }

    #[test]
    fn test_capacity_blocks_and_unblocks() {
        let broker = JobBroker::standalone(Some(2)).unwrap();
        let a = broker.acquire().unwrap();
        let b = broker.acquire().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = broker.clone();
        let handle = std::thread::spawn(move || {
            let token = waiter.acquire().unwrap();
            tx.send(()).unwrap();
            token.release();
        });

        // Both slots are held, so the third acquire must block.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        a.release();
        rx.recv_timeout(Duration::from_secs(5))
            .expect("acquire should unblock after a release");
        handle.join().unwrap();

        b.release();
        // Both slots free again: two immediate acquisitions succeed.
        let _c = broker.acquire().unwrap();
        let _d = broker.acquire().unwrap();
    }

    #[test]
    fn test_eof_is_fatal() {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        // No tokens, and nobody can ever add one.
        unsafe { libc::close(fds[1]) };

        let broker = JobBroker {
            shared: Arc::new(BrokerShared {
                read_fd: fds[0],
                write_fd: fds[0],
                owns_pipe: false,
                makeflags: String::new(),
            }),
        };
        match broker.acquire() {
            Err(BuildError::Resource(_)) => {}
            other => panic!("expected resource error, got {:?}", other.map(|_| ())),
        }
        unsafe { libc::close(fds[0]) };
    }

    #[test]
    fn test_spawn_failure_releases_token() {
        let broker = JobBroker::standalone(Some(1)).unwrap();
        let cmd = ProcessBuilder::new("/nonexistent/embark-test-binary");
        match broker.popen(&cmd, true, false) {
            Err(BuildError::Spawn { .. }) => {}
            other => panic!("expected spawn error, got {:?}", other.map(|_| ())),
        }
        // The only token must be free again, without any wait.
        let token = broker.acquire().unwrap();
        token.release();
    }

    #[test]
    fn test_popen_wait_releases_token() {
        let broker = JobBroker::standalone(Some(1)).unwrap();
        let mut handle = broker.popen(&ProcessBuilder::new("true"), true, false).unwrap();
        handle.expect_success().unwrap();
        let token = broker.acquire().unwrap();
        token.release();
    }

    #[test]
    fn test_expect_success_reports_exit_code() {
        let broker = JobBroker::standalone(Some(1)).unwrap();
        let mut handle = broker.popen(&ProcessBuilder::new("false"), true, false).unwrap();
        match handle.expect_success() {
            Err(BuildError::ProcessFailure { code, command }) => {
                assert_eq!(code, 1);
                assert_eq!(command, "false");
            }
            other => panic!("expected process failure, got {:?}", other),
        }
    }

    #[test]
    fn test_children_see_the_jobserver() {
        let broker = JobBroker::standalone(Some(2)).unwrap();
        let cmd = ProcessBuilder::new("sh").args(["-c", "echo \"$MAKEFLAGS\""]);
        let mut handle = broker.popen(&cmd, true, true).unwrap();
        let mut stdout = String::new();
        handle
            .take_stdout()
            .unwrap()
            .read_to_string(&mut stdout)
            .unwrap();
        handle.expect_success().unwrap();
        assert!(stdout.contains("--jobserver-auth="));
    }
}
