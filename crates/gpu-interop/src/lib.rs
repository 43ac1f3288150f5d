//! GPU driver seam for offscreen rendering into shared buffers.
//!
//! This crate defines the [`GpuDriver`] trait, the small slice of EGL and
//! GL ES an offscreen session needs. On Linux and Android, [`EglDriver`]
//! imports DMA-BUFs or hardware buffers as `EGLImage`s and exports native
//! fences. [`SoftwareDriver`] implements the same surface on the CPU, with
//! exact resource accounting, for headless runs and tests.

pub mod driver;
pub use driver::{
    framebuffer_status, BufferId, ContextId, DeviceStatus, DriverError, FramebufferId, GpuDriver,
    ImageId, ProgramId, ResourceCounts, ShaderId, SurfaceId, SyncId, TextureId, ATTRIB_POSITION,
    ATTRIB_TEXCOORD, FULLSCREEN_QUAD, QUAD_STRIDE,
};

// Platform-specific implementations.

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod egl;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use egl::EglDriver;

pub mod software;
pub use software::{FaultInjector, SoftwareDriver};
