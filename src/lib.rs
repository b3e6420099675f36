//! Capture a process's native stdout and stderr at the file descriptor level.
//!
//! Each captured descriptor is pointed at a pipe with `dup2`, so anything
//! written to it (Rust `print!`, C `printf`, raw `write(2)` from a native
//! library or a child process) lands in the pipe. A background thread per
//! stream drains the pipe and hands each chunk to a [`LogSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! stdiocap::activate(Arc::new(stdiocap::TracingSink))?;
//! println!("this ends up in the log");
//! # Ok::<(), stdiocap::RedirectError>(())
//! ```
#![cfg(unix)]

pub mod config;
pub mod drain;
pub mod error;
pub mod framing;
pub mod logging;
pub mod manager;
pub mod redirect;
pub mod severity;
pub mod sink;
pub mod stream;

pub use drain::{CaptureOptions, DrainExit, DrainReport, DrainWorker};
pub use error::{RedirectError, Step};
pub use framing::Framing;
pub use manager::{Activation, RedirectionManager, activate, activate_with, is_active, shutdown};
pub use redirect::PipeHandles;
pub use severity::Severity;
#[cfg(target_os = "android")]
pub use sink::LogcatSink;
pub use sink::{ChannelSink, LogRecord, LogSink, TracingSink};
pub use stream::{BufferedHandle, StreamDescriptor, default_streams};
