use std::cell::Cell;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::framing::{Framing, LineFramer};
use crate::redirect;
use crate::severity::Severity;
use crate::sink::LogSink;
use crate::stream::StreamDescriptor;

/// Matches the longest line the Android logger accepts comfortably.
pub const DEFAULT_BUFFER_SIZE: usize = 4000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tuning shared by every drain worker of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Read buffer size. Each read takes at most `buffer_size - 1` bytes.
    pub buffer_size: usize,
    pub framing: Framing,
    /// How long a worker waits for data before checking for shutdown.
    pub poll_interval: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            framing: Framing::Chunk,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl CaptureOptions {
    /// Largest record a single read can produce.
    pub fn max_record_len(&self) -> usize {
        self.buffer_size.saturating_sub(1).max(1)
    }
}

/// Why a drain worker stopped.
#[derive(Debug)]
pub enum DrainExit {
    /// Every writer closed the pipe.
    EndOfStream,
    /// Shutdown was requested and the pipe had gone quiet.
    Cancelled,
    /// Capture for this stream is over; the process carries on.
    ReadFailed(io::Error),
    /// The sink panicked. Output after that was read and discarded.
    Panicked,
}

impl DrainExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, DrainExit::EndOfStream | DrainExit::Cancelled)
    }
}

/// Summary of one worker's lifetime, returned by [`DrainWorker::join`].
#[derive(Debug)]
pub struct DrainReport {
    pub tag: String,
    pub exit: DrainExit,
    pub records: u64,
    pub bytes: u64,
}

struct Counts {
    records: u64,
    bytes: u64,
}

/// Where a redirected descriptor goes back to if its worker gives up.
struct Fallback {
    descriptor: StreamDescriptor,
    saved: OwnedFd,
}

impl Fallback {
    fn hand_back(self, tag: &str) {
        let fd = self.descriptor.target_fd;
        match redirect::reattach(&self.descriptor, self.saved) {
            Ok(()) => tracing::warn!(stream = tag, fd, "capture abandoned, descriptor restored"),
            Err(err) => tracing::error!(stream = tag, error = %err, "could not restore descriptor"),
        }
    }
}

/// Background thread that empties one capture pipe into a sink.
pub struct DrainWorker {
    tag: String,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<(DrainExit, Counts)>,
}

impl std::fmt::Debug for DrainWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainWorker")
            .field("tag", &self.tag)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl DrainWorker {
    /// Start draining `read_end`. The worker owns the read end from here on.
    pub fn spawn(
        read_end: OwnedFd,
        tag: &str,
        severity: Severity,
        sink: Arc<dyn LogSink>,
        options: &CaptureOptions,
    ) -> io::Result<Self> {
        Self::start(read_end, tag, severity, sink, options, None)
    }

    /// Drain the pipe behind a redirected `descriptor`.
    ///
    /// If reading fails or the sink panics, the worker points the descriptor
    /// back at `saved` before it stops forwarding, so the process never
    /// writes into a pipe nobody reads.
    pub fn spawn_redirected(
        read_end: OwnedFd,
        descriptor: &StreamDescriptor,
        saved: OwnedFd,
        sink: Arc<dyn LogSink>,
        options: &CaptureOptions,
    ) -> io::Result<Self> {
        let fallback = Fallback {
            descriptor: descriptor.clone(),
            saved,
        };
        Self::start(
            read_end,
            &descriptor.tag,
            descriptor.severity,
            sink,
            options,
            Some(fallback),
        )
    }

    fn start(
        read_end: OwnedFd,
        tag: &str,
        severity: Severity,
        sink: Arc<dyn LogSink>,
        options: &CaptureOptions,
        fallback: Option<Fallback>,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_tag = tag.to_string();
        let options = options.clone();

        let handle = thread::Builder::new()
            .name(format!("stdiocap-{}", tag))
            .spawn(move || {
                run(
                    read_end,
                    &thread_tag,
                    severity,
                    sink.as_ref(),
                    &options,
                    &thread_shutdown,
                    fallback,
                )
            })?;

        Ok(Self {
            tag: tag.to_string(),
            shutdown,
            handle,
        })
    }

    /// Ask the worker to stop once the pipe has nothing left to read.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Wait for the worker to stop. Does not request shutdown by itself.
    pub fn join(self) -> DrainReport {
        match self.handle.join() {
            Ok((exit, counts)) => DrainReport {
                tag: self.tag,
                exit,
                records: counts.records,
                bytes: counts.bytes,
            },
            Err(_) => DrainReport {
                tag: self.tag,
                exit: DrainExit::Panicked,
                records: 0,
                bytes: 0,
            },
        }
    }
}

/// Wait up to `timeout` for `fd` to become readable (or hung up).
pub(crate) fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    match unsafe { libc::poll(&mut pfd, 1, millis) } {
        -1 => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            }
        }
        0 => Ok(false),
        _ => Ok(true),
    }
}

fn run(
    read_end: OwnedFd,
    tag: &str,
    severity: Severity,
    sink: &dyn LogSink,
    options: &CaptureOptions,
    shutdown: &AtomicBool,
    mut fallback: Option<Fallback>,
) -> (DrainExit, Counts) {
    let fd = read_end.as_raw_fd();
    // The read end stays open until this function returns, whatever happens.
    let mut pipe = File::from(read_end);
    let mut buf = vec![0u8; options.max_record_len()];
    let mut framer = match options.framing {
        Framing::Chunk => None,
        Framing::Lines => Some(LineFramer::new(options.max_record_len())),
    };

    let sink_panicked = Cell::new(false);
    let mut panic_logged = false;
    let mut records = 0u64;
    let mut bytes = 0u64;
    let mut emit = |chunk: &[u8]| {
        if sink_panicked.get() {
            return;
        }
        let message = String::from_utf8_lossy(chunk);
        match panic::catch_unwind(AssertUnwindSafe(|| sink.emit(tag, severity, &message))) {
            Ok(()) => records += 1,
            Err(_) => sink_panicked.set(true),
        }
    };

    tracing::debug!(stream = tag, fd, "drain worker started");

    let exit = loop {
        match wait_readable(fd, options.poll_interval) {
            Ok(true) => {}
            Ok(false) => {
                if !shutdown.load(Ordering::Acquire) {
                    continue;
                }
                // Anything written before the flag went up is already queued.
                match wait_readable(fd, Duration::ZERO) {
                    Ok(true) => {}
                    _ => break DrainExit::Cancelled,
                }
            }
            Err(e) => break DrainExit::ReadFailed(e),
        }

        match pipe.read(&mut buf) {
            Ok(0) => break DrainExit::EndOfStream,
            Ok(n) => {
                match framer.as_mut() {
                    Some(framer) => framer.push(&buf[..n], &mut emit),
                    None => emit(&buf[..n]),
                }
                bytes += n as u64;
                if sink_panicked.get() && !panic_logged {
                    panic_logged = true;
                    tracing::error!(stream = tag, "log sink panicked, discarding the rest of this stream");
                    if let Some(fallback) = fallback.take() {
                        fallback.hand_back(tag);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break DrainExit::ReadFailed(e),
        }
    };

    if let Some(framer) = framer.as_mut() {
        framer.finish(&mut emit);
    }

    if let DrainExit::ReadFailed(e) = &exit {
        tracing::warn!(stream = tag, error = %e, "capture stopped: read from pipe failed");
        if let Some(fallback) = fallback.take() {
            fallback.hand_back(tag);
        }
    }
    let exit = match exit {
        exit if exit.is_clean() && sink_panicked.get() => DrainExit::Panicked,
        exit => exit,
    };
    tracing::debug!(stream = tag, exit = ?exit, records, bytes, "drain worker finished");
    (exit, Counts { records, bytes })
}
