//! Shared types for rendering into cross-process buffers.
//!
//! Nothing here talks to a GPU. The crate describes the buffer a session
//! renders into ([`SharedBuffer`]), the completion signal handed back per
//! frame ([`FenceHandle`], [`FrameCompletion`]), session configuration, the
//! error kinds, and logging setup. [`gpu-interop`] and [`offscreen-gpu`]
//! build on these.
//!
//! [`gpu-interop`]: ../gpu_interop/index.html
//! [`offscreen-gpu`]: ../offscreen_gpu/index.html

#![cfg(unix)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod fence;
pub mod logging;
pub mod state;

pub use buffer::{
    BufferDesc, BufferSource, BufferUsage, HardwareBufferRef, HostBuffer, LayoutError, PixelFormat,
    SharedBuffer,
};
pub use config::{
    ApiTier, BlendMode, ContextConfig, ContextFlags, ContextScope, RenderConfig, SessionConfig,
    DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER,
};
pub use error::{OffscreenError, ShaderStage};
pub use fence::{FenceHandle, FrameCompletion};
pub use logging::{init_logging, LoggingConfig};
pub use state::SessionState;
