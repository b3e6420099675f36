use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::RedirectError;
use crate::stream::StreamDescriptor;

/// What a successful redirection leaves behind.
///
/// The pipe's write end is not here: after `dup2` the target descriptor is
/// the write end, and the original copy has been closed.
#[derive(Debug)]
pub struct PipeHandles {
    /// Read end of the capture pipe, to be drained.
    pub read: OwnedFd,
    /// Duplicate of whatever the target pointed at before, for restoring.
    pub saved: OwnedFd,
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Create a pipe with close-on-exec set on both ends.
pub fn pipe_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];

    #[cfg(any(target_os = "linux", target_os = "android"))]
    cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;

    // SAFETY: pipe just returned two fresh descriptors that nothing else owns.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    for fd in [&read, &write] {
        cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }

    Ok((read, write))
}

pub(crate) fn dup_cloexec(fd: RawFd) -> io::Result<OwnedFd> {
    let new = cvt(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(new) })
}

/// `dup2` that retries on EINTR. The new descriptor is inheritable.
fn dup2(src: RawFd, dst: RawFd) -> io::Result<()> {
    loop {
        match cvt(unsafe { libc::dup2(src, dst) }) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Point `desc.target_fd` at a fresh pipe.
///
/// Steps run in order and stop at the first failure:
///   1. make the buffered handle unbuffered
///   2. create the pipe
///   3. save the current target and `dup2` the write end over it
///
/// On failure nothing created here survives and the target still points
/// where it did before.
pub fn redirect(desc: &StreamDescriptor) -> Result<PipeHandles, RedirectError> {
    desc.handle
        .make_unbuffered()
        .map_err(|source| RedirectError::Configure {
            stream: desc.tag.clone(),
            source,
        })?;

    let (read, write) = pipe_cloexec().map_err(|source| RedirectError::CreatePipe {
        stream: desc.tag.clone(),
        source,
    })?;

    let duplicate_err = |source| RedirectError::Duplicate {
        stream: desc.tag.clone(),
        source,
    };

    let saved = dup_cloexec(desc.target_fd).map_err(duplicate_err)?;
    // Anything still buffered belongs to the old destination.
    let _ = desc.handle.flush();
    dup2(write.as_raw_fd(), desc.target_fd).map_err(duplicate_err)?;
    drop(write);

    tracing::debug!(
        stream = %desc.tag,
        fd = desc.target_fd,
        read_fd = read.as_raw_fd(),
        "redirected descriptor into pipe"
    );

    Ok(PipeHandles { read, saved })
}

/// Point `desc.target_fd` back at what `saved` refers to.
///
/// Once every copy of the pipe's write end is gone the drain worker sees
/// end of stream.
pub fn restore(desc: &StreamDescriptor, saved: OwnedFd) -> Result<(), RedirectError> {
    let _ = desc.handle.flush();
    reattach(desc, saved)
}

/// [`restore`] without flushing the buffered handle. Used from drain
/// threads, which must never wait on a stdio lock a blocked writer holds.
pub(crate) fn reattach(desc: &StreamDescriptor, saved: OwnedFd) -> Result<(), RedirectError> {
    dup2(saved.as_raw_fd(), desc.target_fd).map_err(|source| RedirectError::Restore {
        stream: desc.tag.clone(),
        fd: desc.target_fd,
        source,
    })?;
    tracing::debug!(stream = %desc.tag, fd = desc.target_fd, "restored descriptor");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Step;
    use crate::severity::Severity;
    use std::fs::File;
    use std::io::Read;

    fn write_fd(fd: RawFd, data: &[u8]) {
        let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        assert_eq!(n, data.len() as isize);
    }

    fn read_some(fd: OwnedFd) -> (File, String) {
        let mut file = File::from(fd);
        let mut buf = [0u8; 256];
        let n = file.read(&mut buf).unwrap();
        (file, String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    fn fd_is_cloexec(fd: RawFd) -> bool {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        flags != -1 && flags & libc::FD_CLOEXEC != 0
    }

    #[test]
    fn pipe_is_cloexec() {
        let (r, w) = pipe_cloexec().unwrap();
        assert!(fd_is_cloexec(r.as_raw_fd()));
        assert!(fd_is_cloexec(w.as_raw_fd()));
    }

    #[test]
    fn redirect_captures_raw_writes() {
        // A private pipe stands in for the terminal.
        let (orig_read, orig_write) = pipe_cloexec().unwrap();
        let desc = StreamDescriptor::detached(orig_write.as_raw_fd(), "synthetic", Severity::Info);

        let handles = redirect(&desc).unwrap();
        assert!(fd_is_cloexec(handles.saved.as_raw_fd()));

        write_fd(desc.target_fd, b"captured");
        let (_capture, got) = read_some(handles.read);
        assert_eq!(got, "captured");

        restore(&desc, handles.saved).unwrap();
        write_fd(desc.target_fd, b"back home");
        let (_orig, got) = read_some(orig_read);
        assert_eq!(got, "back home");
        drop(orig_write);
    }

    #[test]
    fn closing_target_ends_the_pipe() {
        let (_orig_read, orig_write) = pipe_cloexec().unwrap();
        let desc = StreamDescriptor::detached(orig_write.as_raw_fd(), "teardown", Severity::Info);
        let handles = redirect(&desc).unwrap();

        write_fd(desc.target_fd, b"last words");
        drop(orig_write);

        let mut capture = File::from(handles.read);
        let mut all = String::new();
        capture.read_to_string(&mut all).unwrap();
        assert_eq!(all, "last words");
    }

    #[test]
    fn restore_gives_eof_to_reader() {
        let (_orig_read, orig_write) = pipe_cloexec().unwrap();
        let desc = StreamDescriptor::detached(orig_write.as_raw_fd(), "restore", Severity::Info);
        let handles = redirect(&desc).unwrap();
        restore(&desc, handles.saved).unwrap();

        let mut capture = File::from(handles.read);
        let mut all = Vec::new();
        assert_eq!(capture.read_to_end(&mut all).unwrap(), 0);
    }

    #[test]
    fn invalid_target_fails_at_duplicate_step() {
        let desc = StreamDescriptor::detached(-1, "bogus", Severity::Warn);
        let err = redirect(&desc).unwrap_err();
        assert_eq!(err.step(), Step::Duplicate);
        assert_eq!(err.stream(), "bogus");
        assert_eq!(err.os_error(), Some(libc::EBADF));
    }
}
