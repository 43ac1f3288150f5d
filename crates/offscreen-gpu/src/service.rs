//! The three operations an activation or IPC layer drives.

use gpu_interop::GpuDriver;
use offscreen_core::{FrameCompletion, OffscreenError, SharedBuffer};

use crate::session::OffscreenSession;

/// Configure once, render any number of times, tear down.
///
/// Buffers come in and fences go out by ownership transfer; a transport
/// that passes OS handles by duplication dups them before calling in.
pub trait OffscreenService {
    /// Bind `buffer` as the render target. A second call while configured
    /// fails with [`OffscreenError::AlreadyConfigured`].
    fn configure(
        &mut self,
        buffer: SharedBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), OffscreenError>;

    /// `Ok(None)` means "not configured yet": poll again later.
    fn render(&mut self) -> Result<Option<FrameCompletion>, OffscreenError>;

    /// Release all GPU-side objects. Repeated calls succeed.
    fn teardown(&mut self) -> Result<(), OffscreenError>;
}

impl<D: GpuDriver> OffscreenService for OffscreenSession<D> {
    fn configure(
        &mut self,
        buffer: SharedBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), OffscreenError> {
        OffscreenSession::configure(self, buffer, width, height)
    }

    fn render(&mut self) -> Result<Option<FrameCompletion>, OffscreenError> {
        OffscreenSession::render(self)
    }

    fn teardown(&mut self) -> Result<(), OffscreenError> {
        self.destroy();
        Ok(())
    }
}
