use std::collections::BTreeSet;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::drain::{CaptureOptions, DrainReport, DrainWorker};
use crate::error::RedirectError;
use crate::redirect;
use crate::sink::LogSink;
use crate::stream::{StreamDescriptor, default_streams};

/// Target descriptors currently redirected by any manager in this process.
static CLAIMED: Mutex<BTreeSet<RawFd>> = Mutex::new(BTreeSet::new());

/// The manager behind [`activate`] and [`shutdown`].
static GLOBAL: Mutex<Option<RedirectionManager>> = Mutex::new(None);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn claim(desc: &StreamDescriptor) -> Result<(), RedirectError> {
    if lock(&CLAIMED).insert(desc.target_fd) {
        Ok(())
    } else {
        Err(RedirectError::AlreadyRedirected {
            stream: desc.tag.clone(),
            fd: desc.target_fd,
        })
    }
}

fn release(fd: RawFd) {
    lock(&CLAIMED).remove(&fd);
}

/// Outcome of a successful [`RedirectionManager::activate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The streams are now captured.
    Activated,
    /// Capture was already running; nothing changed.
    AlreadyActive,
}

struct ActiveStream {
    descriptor: StreamDescriptor,
    saved: OwnedFd,
    worker: DrainWorker,
}

/// Sets up and tears down capture for a set of streams.
///
/// Capture is all-or-nothing: if any stream fails to redirect, the ones
/// already redirected in the same call are put back before the error is
/// returned. Dropping an active manager leaves the drain threads running
/// until the process exits; call [`shutdown`](Self::shutdown) to restore the
/// original descriptors.
pub struct RedirectionManager {
    options: CaptureOptions,
    sink: Arc<dyn LogSink>,
    active: Vec<ActiveStream>,
    activated: bool,
}

impl std::fmt::Debug for RedirectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectionManager")
            .field("options", &self.options)
            .field("streams", &self.streams())
            .field("activated", &self.activated)
            .finish()
    }
}

impl RedirectionManager {
    pub fn new(options: CaptureOptions, sink: Arc<dyn LogSink>) -> Self {
        Self {
            options,
            sink,
            active: Vec::new(),
            activated: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.activated
    }

    /// Tags of the streams currently captured, in activation order.
    pub fn streams(&self) -> Vec<&str> {
        self.active.iter().map(|s| s.descriptor.tag.as_str()).collect()
    }

    /// Redirect every descriptor, in order, and start a drain worker for each.
    ///
    /// Calling this on an active manager is a no-op that returns
    /// [`Activation::AlreadyActive`].
    pub fn activate(&mut self, descriptors: &[StreamDescriptor]) -> Result<Activation, RedirectError> {
        if self.activated {
            tracing::debug!("stdio capture already active");
            return Ok(Activation::AlreadyActive);
        }

        let mut started = Vec::with_capacity(descriptors.len());
        for desc in descriptors {
            match self.start_stream(desc) {
                Ok(stream) => started.push(stream),
                Err(err) => {
                    tracing::warn!(
                        stream = %desc.tag,
                        step = %err.step(),
                        error = %err,
                        rolled_back = started.len(),
                        "stdio capture failed"
                    );
                    let (_, restore_err) = teardown(started);
                    if let Some(restore_err) = restore_err {
                        tracing::error!(error = %restore_err, "could not roll back capture");
                    }
                    return Err(err);
                }
            }
        }

        self.active = started;
        self.activated = true;
        tracing::info!(streams = ?self.streams(), "stdio capture active");
        Ok(Activation::Activated)
    }

    fn start_stream(&self, desc: &StreamDescriptor) -> Result<ActiveStream, RedirectError> {
        claim(desc)?;

        let handles = match redirect::redirect(desc) {
            Ok(handles) => handles,
            Err(err) => {
                release(desc.target_fd);
                return Err(err);
            }
        };

        // The worker keeps its own copy of the saved descriptor so it can
        // hand the target back by itself if it dies.
        let spawned = redirect::dup_cloexec(handles.saved.as_raw_fd())
            .map_err(|source| RedirectError::Duplicate {
                stream: desc.tag.clone(),
                source,
            })
            .and_then(|fallback| {
                DrainWorker::spawn_redirected(
                    handles.read,
                    desc,
                    fallback,
                    Arc::clone(&self.sink),
                    &self.options,
                )
                .map_err(|source| RedirectError::SpawnWorker {
                    stream: desc.tag.clone(),
                    source,
                })
            });

        match spawned {
            Ok(worker) => Ok(ActiveStream {
                descriptor: desc.clone(),
                saved: handles.saved,
                worker,
            }),
            Err(err) => {
                // The read end is gone; put the target back before anything
                // writes into a dead pipe.
                if let Err(restore_err) = redirect::restore(desc, handles.saved) {
                    tracing::error!(error = %restore_err, "could not restore after failed start");
                }
                release(desc.target_fd);
                Err(err)
            }
        }
    }

    /// Put every captured descriptor back and wait for its worker to drain.
    ///
    /// Returns one report per stream. An inactive manager returns an empty
    /// list. The manager can be activated again afterwards.
    pub fn shutdown(&mut self) -> Result<Vec<DrainReport>, RedirectError> {
        if !self.activated {
            return Ok(Vec::new());
        }
        self.activated = false;

        let (reports, err) = teardown(std::mem::take(&mut self.active));
        for report in &reports {
            if report.exit.is_clean() {
                tracing::debug!(stream = %report.tag, records = report.records, bytes = report.bytes, "capture stopped");
            } else {
                tracing::warn!(stream = %report.tag, exit = ?report.exit, "capture ended abnormally");
            }
        }
        match err {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }
}

/// Restore targets in reverse order, then stop and join the workers.
fn teardown(streams: Vec<ActiveStream>) -> (Vec<DrainReport>, Option<RedirectError>) {
    let mut first_err = None;
    let mut workers = Vec::with_capacity(streams.len());

    for stream in streams.into_iter().rev() {
        let ActiveStream {
            descriptor,
            saved,
            worker,
        } = stream;
        if let Err(err) = redirect::restore(&descriptor, saved) {
            first_err.get_or_insert(err);
        }
        release(descriptor.target_fd);
        worker.request_shutdown();
        workers.push(worker);
    }

    let mut reports: Vec<DrainReport> = workers.into_iter().map(DrainWorker::join).collect();
    reports.reverse();
    (reports, first_err)
}

/// Capture the process's stdout and stderr into `sink`.
///
/// Safe to call more than once: later calls return
/// [`Activation::AlreadyActive`] while capture is running.
pub fn activate(sink: Arc<dyn LogSink>) -> Result<Activation, RedirectError> {
    activate_with(CaptureOptions::default(), &default_streams(), sink)
}

/// Like [`activate`] with explicit options and streams.
pub fn activate_with(
    options: CaptureOptions,
    descriptors: &[StreamDescriptor],
    sink: Arc<dyn LogSink>,
) -> Result<Activation, RedirectError> {
    let mut global = lock(&GLOBAL);
    if global.as_ref().is_some_and(RedirectionManager::is_active) {
        return Ok(Activation::AlreadyActive);
    }
    let mut manager = RedirectionManager::new(options, sink);
    let activation = manager.activate(descriptors)?;
    *global = Some(manager);
    Ok(activation)
}

/// Whether the process-wide capture is running.
pub fn is_active() -> bool {
    lock(&GLOBAL).as_ref().is_some_and(RedirectionManager::is_active)
}

/// Stop the process-wide capture started by [`activate`].
pub fn shutdown() -> Result<Vec<DrainReport>, RedirectError> {
    // Release the lock before joining: a sink may ask whether capture is active.
    let taken = lock(&GLOBAL).take();
    match taken {
        Some(mut manager) => manager.shutdown(),
        None => Ok(Vec::new()),
    }
}
