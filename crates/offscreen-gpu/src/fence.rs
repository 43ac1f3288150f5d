//! Per-frame native fence creation and export.

use tracing::trace;

use gpu_interop::{DriverError, GpuDriver};
use offscreen_core::{FenceHandle, OffscreenError};

fn fence_error(err: DriverError) -> OffscreenError {
    match err {
        DriverError::ContextLost => OffscreenError::DeviceLost,
        other => OffscreenError::FenceCreation(other.to_string()),
    }
}

/// Turns the current command stream position into a [`FenceHandle`].
///
/// The sync object only lives inside [`signal_frame_complete`]; what leaves
/// is the exported descriptor, owned by the caller from then on.
///
/// [`signal_frame_complete`]: FrameFence::signal_frame_complete
#[derive(Debug, Default)]
pub struct FrameFence {
    exported: u64,
    failed: u64,
}

impl FrameFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call right after the frame's draw commands were flushed.
    pub fn signal_frame_complete<D: GpuDriver>(
        &mut self,
        driver: &mut D,
        frame: u64,
    ) -> Result<FenceHandle, OffscreenError> {
        let result = Self::export(driver, frame);
        match &result {
            Ok(_) => self.exported += 1,
            Err(_) => self.failed += 1,
        }
        result
    }

    fn export<D: GpuDriver>(driver: &mut D, frame: u64) -> Result<FenceHandle, OffscreenError> {
        let sync = driver.create_native_fence().map_err(fence_error)?;
        // A native fence only gets its fd once the fence command is flushed.
        driver.flush();
        let exported = driver.export_fence_fd(sync);
        driver.destroy_sync(sync);

        let fd = exported.map_err(fence_error)?;
        trace!("frame {frame} fence exported");
        Ok(FenceHandle::new(fd, frame))
    }

    pub fn fences_exported(&self) -> u64 {
        self.exported
    }

    pub fn fences_failed(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GraphicsContext;
    use gpu_interop::SoftwareDriver;
    use offscreen_core::ContextConfig;

    #[test]
    fn exports_and_drops_the_sync_object() {
        let mut driver = SoftwareDriver::new();
        let mut ctx = GraphicsContext::create(&mut driver, None, &ContextConfig::default()).unwrap();
        let surface = ctx.create_offscreen_surface(&mut driver, 0, 0).unwrap();
        ctx.make_current(&mut driver, surface).unwrap();

        let mut fence = FrameFence::new();
        let handle = fence.signal_frame_complete(&mut driver, 9).unwrap();
        assert_eq!(handle.frame(), 9);
        assert!(handle.is_signaled().unwrap());
        assert_eq!(driver.resource_counts().syncs, 0);
        assert_eq!(fence.fences_exported(), 1);
        ctx.release(&mut driver);
    }

    #[test]
    fn missing_extension_is_fence_creation_error() {
        let mut driver = SoftwareDriver::new();
        driver.fault_injector().disable_native_fences();
        let mut ctx = GraphicsContext::create(&mut driver, None, &ContextConfig::default()).unwrap();
        let surface = ctx.create_offscreen_surface(&mut driver, 0, 0).unwrap();
        ctx.make_current(&mut driver, surface).unwrap();

        let mut fence = FrameFence::new();
        let err = fence.signal_frame_complete(&mut driver, 1).unwrap_err();
        assert!(matches!(err, OffscreenError::FenceCreation(_)));
        assert_eq!(fence.fences_failed(), 1);
        ctx.release(&mut driver);
    }
}
