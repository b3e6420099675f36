use std::io::{self, Write};
use std::os::fd::RawFd;

use crate::severity::Severity;

/// The C runtime's buffered `FILE` bound to a captured descriptor.
///
/// The handle is owned by the C runtime; capture only changes its buffering
/// mode and flushes it around redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferedHandle {
    Stdout,
    Stderr,
    /// No buffered handle, e.g. a synthetic descriptor.
    Detached,
}

#[allow(non_upper_case_globals)]
mod cstdio {
    #[cfg(not(any(target_vendor = "apple", target_os = "freebsd")))]
    unsafe extern "C" {
        pub static stdout: *mut libc::FILE;
        pub static stderr: *mut libc::FILE;
    }

    #[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
    unsafe extern "C" {
        #[link_name = "__stdoutp"]
        pub static stdout: *mut libc::FILE;
        #[link_name = "__stderrp"]
        pub static stderr: *mut libc::FILE;
    }
}

impl BufferedHandle {
    fn file(self) -> Option<*mut libc::FILE> {
        // SAFETY: the C runtime initializes these before main and never moves them.
        match self {
            BufferedHandle::Stdout => Some(unsafe { cstdio::stdout }),
            BufferedHandle::Stderr => Some(unsafe { cstdio::stderr }),
            BufferedHandle::Detached => None,
        }
    }

    /// Flush both the Rust-side and the C-side buffers so nothing written
    /// before a descriptor swap ends up on the wrong side of it.
    pub fn flush(self) -> io::Result<()> {
        match self {
            BufferedHandle::Stdout => io::stdout().flush()?,
            BufferedHandle::Stderr => io::stderr().flush()?,
            BufferedHandle::Detached => return Ok(()),
        }
        if let Some(file) = self.file() {
            if unsafe { libc::fflush(file) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Put the C `FILE` into `_IONBF` mode so every `printf` reaches the
    /// descriptor immediately.
    pub fn make_unbuffered(self) -> io::Result<()> {
        let Some(file) = self.file() else {
            return Ok(());
        };
        self.flush()?;
        if unsafe { libc::setvbuf(file, std::ptr::null_mut(), libc::_IONBF, 0) } != 0 {
            // setvbuf is not required to set errno
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(code) if code != 0 => err,
                _ => io::Error::other("setvbuf rejected _IONBF"),
            });
        }
        Ok(())
    }
}

/// One descriptor to capture and how to label what comes out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub target_fd: RawFd,
    pub handle: BufferedHandle,
    pub tag: String,
    pub severity: Severity,
}

impl StreamDescriptor {
    /// Describe `target_fd`, picking the C handle for fds 1 and 2.
    pub fn new(target_fd: RawFd, tag: impl Into<String>, severity: Severity) -> Self {
        let handle = match target_fd {
            libc::STDOUT_FILENO => BufferedHandle::Stdout,
            libc::STDERR_FILENO => BufferedHandle::Stderr,
            _ => BufferedHandle::Detached,
        };
        Self {
            target_fd,
            handle,
            tag: tag.into(),
            severity,
        }
    }

    /// A descriptor with no buffered handle behind it.
    pub fn detached(target_fd: RawFd, tag: impl Into<String>, severity: Severity) -> Self {
        Self {
            target_fd,
            handle: BufferedHandle::Detached,
            tag: tag.into(),
            severity,
        }
    }

    pub fn stdout() -> Self {
        Self::new(libc::STDOUT_FILENO, "native.stdout", Severity::Info)
    }

    pub fn stderr() -> Self {
        Self::new(libc::STDERR_FILENO, "native.stderr", Severity::Warn)
    }
}

/// The streams captured when nothing else is configured: stdout then stderr.
pub fn default_streams() -> Vec<StreamDescriptor> {
    vec![StreamDescriptor::stdout(), StreamDescriptor::stderr()]
}
