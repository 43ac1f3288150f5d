//! Per-frame completion handles handed to the consumer.
//!
//! A [`FenceHandle`] owns an OS file descriptor (a `sync_file` on Android and
//! Linux GPUs) that becomes readable once the GPU work of its frame is done.
//! Ownership passes to whoever receives the handle: they wait on it and close
//! it, independently of the session that produced it.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::error::OffscreenError;

#[derive(Debug)]
pub struct FenceHandle {
    fd: OwnedFd,
    frame: u64,
}

impl FenceHandle {
    pub fn new(fd: OwnedFd, frame: u64) -> Self {
        Self { fd, frame }
    }

    /// Frame number this fence completes. Starts at 1 and grows by one per
    /// rendered frame of a session.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Block until the fence signals or `timeout` expires. `None` waits
    /// forever. Returns whether the fence signaled.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        self.poll(timeout_ms)
    }

    /// Non-blocking check.
    pub fn is_signaled(&self) -> io::Result<bool> {
        self.poll(0)
    }

    /// Duplicate the descriptor, for transports that hand handles over by
    /// duplication.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
            frame: self.frame,
        })
    }

    fn poll(&self, timeout_ms: libc::c_int) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: `pfd` is a valid pollfd for the duration of the call.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if rc == 0 {
                return Ok(false);
            }
            if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                return Err(io::Error::other(format!(
                    "fence for frame {} signaled an error",
                    self.frame
                )));
            }
            return Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0);
        }
    }
}

impl AsFd for FenceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for FenceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for FenceHandle {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl From<FenceHandle> for OwnedFd {
    fn from(handle: FenceHandle) -> OwnedFd {
        handle.fd
    }
}

/// Result of one successful `render` call.
///
/// `Unconfirmed` is the degraded case: the frame was submitted and flushed
/// but no fence could be exported, so the consumer has nothing to wait on.
#[must_use = "an unconfirmed frame has no completion signal and must be handled"]
#[derive(Debug)]
pub enum FrameCompletion {
    Fenced(FenceHandle),
    Unconfirmed { frame: u64, error: OffscreenError },
}

impl FrameCompletion {
    pub fn frame(&self) -> u64 {
        match self {
            FrameCompletion::Fenced(fence) => fence.frame(),
            FrameCompletion::Unconfirmed { frame, .. } => *frame,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, FrameCompletion::Fenced(_))
    }

    pub fn fence(&self) -> Option<&FenceHandle> {
        match self {
            FrameCompletion::Fenced(fence) => Some(fence),
            FrameCompletion::Unconfirmed { .. } => None,
        }
    }

    /// The fence, or the error that prevented exporting one.
    pub fn into_fence(self) -> Result<FenceHandle, OffscreenError> {
        match self {
            FrameCompletion::Fenced(fence) => Ok(fence),
            FrameCompletion::Unconfirmed { error, .. } => Err(error),
        }
    }
}
