//! The driver seam: the thin slice of GL ES and EGL the offscreen core needs.

use std::fmt;
use std::os::fd::OwnedFd;

use offscreen_core::{ApiTier, BlendMode, ContextFlags, ShaderStage, SharedBuffer};

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn raw(self) -> u32 {
                    self.0
                }
            }
        )*
    };
}

handle! {
    /// Rendering context.
    ContextId;
    /// Placeholder pbuffer surface.
    SurfaceId;
    /// Imported external image (`EGLImage`).
    ImageId;
    TextureId;
    FramebufferId;
    ShaderId;
    ProgramId;
    /// Vertex buffer.
    BufferId;
    /// Native fence sync object.
    SyncId;
}

/// `glCheckFramebufferStatus` values.
pub mod framebuffer_status {
    pub const COMPLETE: u32 = 0x8CD5;
    pub const INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;
    pub const INCOMPLETE_MISSING_ATTACHMENT: u32 = 0x8CD7;
    pub const UNSUPPORTED: u32 = 0x8CDD;
}

/// Attribute slot of the quad's clip-space position.
pub const ATTRIB_POSITION: u32 = 0;
/// Attribute slot of the quad's texture coordinate.
pub const ATTRIB_TEXCOORD: u32 = 1;

/// Full-target quad as a triangle strip: `x, y, u, v` per vertex.
pub const FULLSCREEN_QUAD: [[f32; 4]; 4] = [
    [-1.0, -1.0, 0.0, 0.0],
    [1.0, -1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0, 1.0],
];

/// Byte distance between two quad vertices.
pub const QUAD_STRIDE: i32 = 16;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("{call} failed: {detail}")]
    Call { call: &'static str, detail: String },

    /// A call that reports a diagnostic log (shader compile, program link).
    #[error("{call} failed:\n{log}")]
    Diagnostic { call: &'static str, log: String },

    #[error("{0} is not supported by this driver")]
    Unsupported(String),

    #[error("no context is current")]
    NotCurrent,

    #[error("context lost")]
    ContextLost,
}

impl DriverError {
    pub fn call(call: &'static str, detail: impl fmt::Display) -> Self {
        DriverError::Call {
            call,
            detail: detail.to_string(),
        }
    }
}

/// Outcome of a graphics reset status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Ok,
    Lost,
}

/// Live driver objects, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub contexts: usize,
    pub surfaces: usize,
    pub images: usize,
    pub textures: usize,
    pub framebuffers: usize,
    pub shaders: usize,
    pub programs: usize,
    pub buffers: usize,
    pub syncs: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.contexts
            + self.surfaces
            + self.images
            + self.textures
            + self.framebuffers
            + self.shaders
            + self.programs
            + self.buffers
            + self.syncs
    }

    /// Objects other than the context and its placeholder surface.
    pub fn gpu_objects(&self) -> usize {
        self.total() - self.contexts - self.surfaces
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// GL ES / EGL operations used by the offscreen core.
///
/// Implementations are bound to the thread that created them: every call
/// after `make_current` acts on the context current on that thread.
/// Deletion calls accept handles the driver no longer knows and ignore them.
pub trait GpuDriver {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    // -- context --------------------------------------------------------

    fn create_context(
        &mut self,
        share: Option<ContextId>,
        tier: ApiTier,
        flags: ContextFlags,
    ) -> Result<ContextId, DriverError>;

    fn create_pbuffer_surface(
        &mut self,
        context: ContextId,
        width: u32,
        height: u32,
    ) -> Result<SurfaceId, DriverError>;

    fn make_current(&mut self, context: ContextId, surface: SurfaceId) -> Result<(), DriverError>;

    fn current_context(&self) -> Option<ContextId>;

    fn release_current(&mut self);

    fn destroy_surface(&mut self, surface: SurfaceId);

    fn destroy_context(&mut self, context: ContextId);

    // -- external images --------------------------------------------------

    fn import_buffer(&mut self, buffer: &SharedBuffer) -> Result<ImageId, DriverError>;

    fn destroy_image(&mut self, image: ImageId);

    fn create_texture(&mut self) -> Result<TextureId, DriverError>;

    /// Make `image` the storage of `texture` (`glEGLImageTargetTexture2DOES`).
    fn bind_image_to_texture(&mut self, texture: TextureId, image: ImageId)
        -> Result<(), DriverError>;

    fn delete_texture(&mut self, texture: TextureId);

    // -- render target ----------------------------------------------------

    fn create_framebuffer(&mut self) -> Result<FramebufferId, DriverError>;

    /// Attach `texture` as color attachment 0 and return the framebuffer
    /// status (see [`framebuffer_status`]).
    fn attach_color_texture(
        &mut self,
        framebuffer: FramebufferId,
        texture: TextureId,
        level: i32,
    ) -> Result<u32, DriverError>;

    /// `None` binds the default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    // -- program ----------------------------------------------------------

    /// `stage` is `Vertex` or `Fragment`.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, DriverError>;

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        attributes: &[(u32, &str)],
    ) -> Result<ProgramId, DriverError>;

    fn delete_shader(&mut self, shader: ShaderId);

    fn delete_program(&mut self, program: ProgramId);

    /// Upload [`FULLSCREEN_QUAD`] into a new vertex buffer.
    fn create_quad_buffer(&mut self) -> Result<BufferId, DriverError>;

    fn delete_buffer(&mut self, buffer: BufferId);

    // -- draw -------------------------------------------------------------

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    fn clear(&mut self, rgba: [f32; 4]);

    fn set_blend(&mut self, mode: BlendMode);

    fn draw_quad(
        &mut self,
        program: ProgramId,
        quad: BufferId,
        texture: Option<TextureId>,
    ) -> Result<(), DriverError>;

    /// Submit queued commands without waiting.
    fn flush(&mut self);

    /// Submit queued commands and wait for them to execute.
    fn finish(&mut self);

    // -- fences -----------------------------------------------------------

    /// Insert a native fence after the commands issued so far.
    fn create_native_fence(&mut self) -> Result<SyncId, DriverError>;

    /// Export the fence as a file descriptor owned by the caller. The sync
    /// object stays alive until [`destroy_sync`](Self::destroy_sync).
    fn export_fence_fd(&mut self, sync: SyncId) -> Result<OwnedFd, DriverError>;

    fn destroy_sync(&mut self, sync: SyncId);

    // -- diagnostics ------------------------------------------------------

    fn reset_status(&mut self) -> DeviceStatus;

    /// RGBA8 pixels of the bound framebuffer, bottom row first.
    fn read_pixels(&mut self, x: i32, y: i32, width: u32, height: u32)
        -> Result<Vec<u8>, DriverError>;

    fn resource_counts(&self) -> ResourceCounts;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_split_context_from_gpu_objects() {
        let counts = ResourceCounts {
            contexts: 1,
            surfaces: 1,
            textures: 1,
            framebuffers: 1,
            ..Default::default()
        };
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.gpu_objects(), 2);
        assert!(!counts.is_empty());
        assert!(ResourceCounts::default().is_empty());
    }

    #[test]
    fn quad_covers_clip_space() {
        for [x, y, u, v] in FULLSCREEN_QUAD {
            assert_eq!(u, (x + 1.0) / 2.0);
            assert_eq!(v, (y + 1.0) / 2.0);
        }
    }
}
