//! Concurrent capture of subprocess output streams.
//!
//! A single background dispatcher owns a dynamic set of output channels
//! (typically the piped stdout/stderr of spawned tools), waits until any
//! of them has data, and forwards complete lines to a logging sink. A
//! process therefore does not need to finish before its output reaches
//! the developer, and no orchestrator thread ever blocks on one stream.

use std::collections::HashMap;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::exec::fd;

/// Severity of one captured output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Destination for captured lines.
pub trait LogSink: Send + Sync {
    fn emit(&self, severity: Severity, line: &str);
}

/// Sink forwarding captured lines as `tracing` events.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, severity: Severity, line: &str) {
        match severity {
            Severity::Debug => tracing::debug!("{}", line),
            Severity::Info => tracing::info!("{}", line),
            Severity::Warning => tracing::warn!("{}", line),
            Severity::Error => tracing::error!("{}", line),
        }
    }
}

/// Per-line severity override, e.g. demoting progress spam or promoting
/// a recognized failure marker.
pub type Classifier = fn(&str, Severity) -> Severity;

/// A readable stream the dispatcher can poll.
pub trait OutputStream: Read + AsRawFd + Send {}

impl<T: Read + AsRawFd + Send> OutputStream for T {}

struct Channel {
    stream: Box<dyn OutputStream>,
    /// Bytes of a line whose terminator has not arrived yet.
    carry: Vec<u8>,
    sink: Arc<dyn LogSink>,
    severity: Severity,
    classifier: Option<Classifier>,
}

struct State {
    channels: HashMap<RawFd, Channel>,
    dispatcher_started: bool,
    worst_emitted: Option<Severity>,
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
    wake_read: RawFd,
    wake_write: RawFd,
}

/// Owns the channel registrations and the background dispatcher.
///
/// Handles are cheap to clone and share one dispatcher, which is started
/// lazily on the first registration and runs for the life of the process.
#[derive(Clone)]
pub struct OutputMultiplexer {
    shared: Arc<Shared>,
}

impl OutputMultiplexer {
    pub fn new() -> io::Result<Self> {
        let (wake_read, wake_write) = fd::pipe()?;
        Ok(OutputMultiplexer {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    channels: HashMap::new(),
                    dispatcher_started: false,
                    worst_emitted: None,
                }),
                cv: Condvar::new(),
                wake_read,
                wake_write,
            }),
        })
    }

    /// Register a stream for line-oriented capture.
    ///
    /// The channel is dropped automatically at end-of-stream or when the
    /// descriptor is discovered closed. A byte on the self-pipe breaks
    /// the dispatcher out of its current wait so the new channel joins
    /// the wait set immediately.
    pub fn watch<S>(
        &self,
        sink: Arc<dyn LogSink>,
        severity: Severity,
        stream: S,
        classifier: Option<Classifier>,
    ) where
        S: OutputStream + 'static,
    {
        let raw = stream.as_raw_fd();
        let mut state = self.shared.state.lock().unwrap();
        if !state.dispatcher_started {
            let shared = Arc::clone(&self.shared);
            thread::spawn(move || dispatch_loop(&shared));
            state.dispatcher_started = true;
        }
        state.channels.insert(
            raw,
            Channel {
                stream: Box::new(stream),
                carry: Vec::new(),
                sink,
                severity,
                classifier,
            },
        );
        drop(state);

        if let Err(err) = fd::write_byte(self.shared.wake_write, b'x') {
            tracing::warn!("failed to wake output dispatcher: {}", err);
        }
        self.shared.cv.notify_all();
    }

    /// The highest severity emitted since the last call, clearing it.
    pub fn take_worst_severity(&self) -> Option<Severity> {
        self.shared.state.lock().unwrap().worst_emitted.take()
    }

    /// Number of currently registered channels.
    pub fn channel_count(&self) -> usize {
        self.shared.state.lock().unwrap().channels.len()
    }
}

fn dispatch_loop(shared: &Shared) {
    loop {
        let mut fds: Vec<RawFd> = {
            let mut state = shared.state.lock().unwrap();
            while state.channels.is_empty() {
                state = shared.cv.wait(state).unwrap();
            }
            state.channels.keys().copied().collect()
        };
        fds.push(shared.wake_read);

        let mut pollfds: Vec<libc::pollfd> = fds
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let rv = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
        if rv < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                // A channel was invalidated between building the wait set
                // and the poll call. Prune and retry.
                prune_invalid(shared);
            }
            continue;
        }

        for pfd in &pollfds {
            if pfd.revents == 0 {
                continue;
            }
            if pfd.fd == shared.wake_read {
                // Wake-up signal from watch(); carries no payload.
                fd::drain(shared.wake_read);
                continue;
            }
            if pfd.revents & libc::POLLNVAL != 0 {
                shared.state.lock().unwrap().channels.remove(&pfd.fd);
                continue;
            }
            service_channel(shared, pfd.fd);
        }
    }
}

fn prune_invalid(shared: &Shared) {
    let mut state = shared.state.lock().unwrap();
    state
        .channels
        .retain(|&raw, _| fd::fd_is_valid(raw));
}

/// Read whatever the channel has ready and emit the complete lines.
///
/// Trailing whitespace is stripped; lines that are empty after stripping
/// are dropped. End-of-stream flushes any unterminated final line and
/// unregisters the channel.
fn service_channel(shared: &Shared, raw: RawFd) {
    let mut state = shared.state.lock().unwrap();
    let Some(channel) = state.channels.get_mut(&raw) else {
        return;
    };

    let mut chunk = [0u8; 4096];
    let mut at_eof = false;
    match channel.stream.read(&mut chunk) {
        Ok(0) => at_eof = true,
        Ok(n) => channel.carry.extend_from_slice(&chunk[..n]),
        Err(err)
            if err.kind() == io::ErrorKind::Interrupted
                || err.kind() == io::ErrorKind::WouldBlock =>
        {
            return;
        }
        Err(_) => at_eof = true,
    }

    let mut worst: Option<Severity> = None;
    loop {
        let line_bytes = match channel.carry.iter().position(|&b| b == b'\n') {
            Some(pos) => channel.carry.drain(..=pos).collect::<Vec<u8>>(),
            None if at_eof && !channel.carry.is_empty() => std::mem::take(&mut channel.carry),
            None => break,
        };
        let line = String::from_utf8_lossy(&line_bytes);
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let severity = match channel.classifier {
            Some(classify) => classify(line, channel.severity),
            None => channel.severity,
        };
        channel.sink.emit(severity, line);
        worst = Some(worst.map_or(severity, |w| w.max(severity)));
    }

    if at_eof {
        state.channels.remove(&raw);
    }
    if let Some(severity) = worst {
        state.worst_emitted = Some(state.worst_emitted.map_or(severity, |w| w.max(severity)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::os::unix::io::FromRawFd;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<(Severity, String)>>,
    }

    impl LogSink for CollectingSink {
        fn emit(&self, severity: Severity, line: &str) {
            self.lines.lock().unwrap().push((severity, line.to_string()));
        }
    }

    impl CollectingSink {
        fn snapshot(&self) -> Vec<(Severity, String)> {
            self.lines.lock().unwrap().clone()
        }

        fn wait_for(&self, count: usize) -> Vec<(Severity, String)> {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let lines = self.snapshot();
                if lines.len() >= count {
                    return lines;
                }
                assert!(Instant::now() < deadline, "timed out waiting for output");
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    fn pipe_pair() -> (File, File) {
        let (read, write) = fd::pipe().unwrap();
        unsafe { (File::from_raw_fd(read), File::from_raw_fd(write)) }
    }

    #[test]
    fn test_no_cross_talk_between_channels() {
        let mux = OutputMultiplexer::new().unwrap();
        let (read_a, mut write_a) = pipe_pair();
        let (read_b, _write_b) = pipe_pair();
        let sink_a = Arc::new(CollectingSink::default());
        let sink_b = Arc::new(CollectingSink::default());

        mux.watch(sink_a.clone(), Severity::Info, read_a, None);
        mux.watch(sink_b.clone(), Severity::Info, read_b, None);

        writeln!(write_a, "hello").unwrap();
        let lines = sink_a.wait_for(1);
        assert_eq!(lines, vec![(Severity::Info, "hello".to_string())]);
        assert!(sink_b.snapshot().is_empty());
    }

    #[test]
    fn test_survivor_keeps_delivering_after_sibling_closes() {
        let mux = OutputMultiplexer::new().unwrap();
        let (read_a, write_a) = pipe_pair();
        let (read_b, mut write_b) = pipe_pair();
        let sink_a = Arc::new(CollectingSink::default());
        let sink_b = Arc::new(CollectingSink::default());

        mux.watch(sink_a.clone(), Severity::Info, read_a, None);
        mux.watch(sink_b.clone(), Severity::Info, read_b, None);

        // Close the first channel; its registration must go away.
        drop(write_a);
        let deadline = Instant::now() + Duration::from_secs(5);
        while mux.channel_count() > 1 {
            assert!(Instant::now() < deadline, "closed channel never pruned");
            thread::sleep(Duration::from_millis(5));
        }

        writeln!(write_b, "still alive").unwrap();
        let lines = sink_b.wait_for(1);
        assert_eq!(lines, vec![(Severity::Info, "still alive".to_string())]);
        assert!(sink_a.snapshot().is_empty());
    }

    #[test]
    fn test_lines_within_channel_keep_order() {
        let mux = OutputMultiplexer::new().unwrap();
        let (read, mut write) = pipe_pair();
        let sink = Arc::new(CollectingSink::default());
        mux.watch(sink.clone(), Severity::Debug, read, None);

        write.write_all(b"one\ntwo\nthree\n").unwrap();
        let lines = sink.wait_for(3);
        let text: Vec<&str> = lines.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(text, ["one", "two", "three"]);
    }

    #[test]
    fn test_blank_lines_dropped_and_whitespace_stripped() {
        let mux = OutputMultiplexer::new().unwrap();
        let (read, mut write) = pipe_pair();
        let sink = Arc::new(CollectingSink::default());
        mux.watch(sink.clone(), Severity::Info, read, None);

        write.write_all(b"   \n  indented line  \n\n").unwrap();
        drop(write);
        let lines = sink.wait_for(1);
        assert_eq!(lines, vec![(Severity::Info, "  indented line".to_string())]);
    }

    #[test]
    fn test_classifier_overrides_severity() {
        fn classify(line: &str, default: Severity) -> Severity {
            if line.contains("FAILED") {
                Severity::Error
            } else {
                default
            }
        }

        let mux = OutputMultiplexer::new().unwrap();
        let (read, mut write) = pipe_pair();
        let sink = Arc::new(CollectingSink::default());
        mux.watch(sink.clone(), Severity::Debug, read, Some(classify));

        write.write_all(b"compiling foo.c\nFAILED: foo.o\n").unwrap();
        let lines = sink.wait_for(2);
        assert_eq!(lines[0], (Severity::Debug, "compiling foo.c".to_string()));
        assert_eq!(lines[1], (Severity::Error, "FAILED: foo.o".to_string()));
    }

    #[test]
    fn test_final_unterminated_line_flushed_at_eof() {
        let mux = OutputMultiplexer::new().unwrap();
        let (read, mut write) = pipe_pair();
        let sink = Arc::new(CollectingSink::default());
        mux.watch(sink.clone(), Severity::Info, read, None);

        write.write_all(b"no newline at end").unwrap();
        drop(write);
        let lines = sink.wait_for(1);
        assert_eq!(lines, vec![(Severity::Info, "no newline at end".to_string())]);
    }

    #[test]
    fn test_worst_severity_flag() {
        let mux = OutputMultiplexer::new().unwrap();
        let (read, mut write) = pipe_pair();
        let sink = Arc::new(CollectingSink::default());
        mux.watch(sink.clone(), Severity::Error, read, None);

        writeln!(write, "something bad").unwrap();
        sink.wait_for(1);
        assert_eq!(mux.take_worst_severity(), Some(Severity::Error));
        // The flag clears on read.
        assert_eq!(mux.take_worst_severity(), None);
    }
}
