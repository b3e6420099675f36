use std::sync::mpsc;

use tracing::Level;

use crate::severity::Severity;

/// Destination for captured output. Called concurrently from one drain
/// thread per stream, so implementations must be thread-safe and should not
/// block for long: a slow sink backs up the pipe and eventually the writer.
pub trait LogSink: Send + Sync {
    fn emit(&self, tag: &str, severity: Severity, message: &str);
}

/// An owned captured record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub tag: String,
    pub severity: Severity,
    pub message: String,
}

/// Forwards records as `tracing` events on target `stdiocap::capture`.
///
/// The subscriber must not write to a captured descriptor, otherwise every
/// record is captured again.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, tag: &str, severity: Severity, message: &str) {
        // Event macros need the level at compile time.
        match severity.tracing_level() {
            Level::TRACE => tracing::trace!(target: "stdiocap::capture", tag, "{}", message),
            Level::DEBUG => tracing::debug!(target: "stdiocap::capture", tag, "{}", message),
            Level::INFO => tracing::info!(target: "stdiocap::capture", tag, "{}", message),
            Level::WARN => tracing::warn!(target: "stdiocap::capture", tag, "{}", message),
            _ => tracing::error!(target: "stdiocap::capture", tag, "{}", message),
        }
    }
}

/// Sends every record over an mpsc channel so a host can poll captured
/// output at its own pace.
pub struct ChannelSink {
    tx: mpsc::Sender<LogRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<LogRecord>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, tag: &str, severity: Severity, message: &str) {
        // Receiver gone means nobody is listening any more; drop the record.
        let _ = self.tx.send(LogRecord {
            tag: tag.to_string(),
            severity,
            message: message.to_string(),
        });
    }
}

#[cfg(target_os = "android")]
mod logcat {
    use std::ffi::CString;
    use std::os::raw::{c_char, c_int};

    use super::LogSink;
    use crate::severity::Severity;

    #[link(name = "log")]
    unsafe extern "C" {
        fn __android_log_write(prio: c_int, tag: *const c_char, text: *const c_char) -> c_int;
    }

    fn c_string(s: &str) -> CString {
        // Interior NULs would truncate the entry; replace them instead.
        CString::new(s.replace('\0', "\u{FFFD}")).unwrap_or_default()
    }

    /// Writes records to the Android system log.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LogcatSink;

    impl LogSink for LogcatSink {
        fn emit(&self, tag: &str, severity: Severity, message: &str) {
            // logcat silently drops empty entries
            let message = if message.is_empty() { " " } else { message };
            let tag = c_string(tag);
            let text = c_string(message);
            unsafe {
                __android_log_write(severity.priority(), tag.as_ptr(), text.as_ptr());
            }
        }
    }
}

#[cfg(target_os = "android")]
pub use logcat::LogcatSink;
