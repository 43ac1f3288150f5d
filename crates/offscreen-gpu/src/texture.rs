//! Shared buffer import and the render target built on it.

use tracing::{debug, warn};

use gpu_interop::{framebuffer_status, DriverError, FramebufferId, GpuDriver, ImageId, TextureId};
use offscreen_core::{BufferDesc, OffscreenError, SharedBuffer};

use crate::context::from_driver;

/// A GL texture whose storage is the shared buffer's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportedTexture {
    pub(crate) image: ImageId,
    pub(crate) texture: TextureId,
    pub width: u32,
    pub height: u32,
}

impl ImportedTexture {
    pub fn texture(&self) -> TextureId {
        self.texture
    }
}

/// A framebuffer whose only color attachment is the imported texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub(crate) framebuffer: FramebufferId,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }
}

/// Keeps the caller's buffer referenced for the session and owns the GL
/// objects that alias it. Every call needs the owning context current.
#[derive(Debug)]
pub struct SharedSurfaceBinding {
    buffer: SharedBuffer,
    texture: Option<ImportedTexture>,
    target: Option<RenderTarget>,
}

fn import_error(err: DriverError) -> OffscreenError {
    match err {
        DriverError::Unsupported(what) => OffscreenError::UnsupportedBuffer(what),
        DriverError::Call { call, detail } if call == "eglCreateImageKHR" => {
            OffscreenError::UnsupportedBuffer(format!("{call}: {detail}"))
        }
        other => from_driver(other),
    }
}

impl SharedSurfaceBinding {
    /// Import `buffer` and create a texture backed by its memory.
    pub fn import_buffer<D: GpuDriver>(
        driver: &mut D,
        buffer: SharedBuffer,
    ) -> Result<Self, OffscreenError> {
        let missing = buffer.desc.missing_usage();
        if !missing.is_empty() {
            return Err(OffscreenError::UnsupportedBuffer(format!(
                "usage lacks {missing:?}"
            )));
        }

        let image = driver.import_buffer(&buffer).map_err(import_error)?;
        let texture = match driver.create_texture() {
            Ok(texture) => texture,
            Err(e) => {
                driver.destroy_image(image);
                return Err(from_driver(e));
            }
        };
        if let Err(e) = driver.bind_image_to_texture(texture, image) {
            driver.delete_texture(texture);
            driver.destroy_image(image);
            return Err(import_error(e));
        }

        debug!(
            "imported {} buffer {}x{} {:?} as texture {}",
            buffer.source.kind(),
            buffer.desc.width,
            buffer.desc.height,
            buffer.desc.format,
            texture.raw()
        );
        let (width, height) = (buffer.desc.width, buffer.desc.height);
        Ok(Self {
            buffer,
            texture: Some(ImportedTexture {
                image,
                texture,
                width,
                height,
            }),
            target: None,
        })
    }

    /// Create the framebuffer with the imported texture at mip level 0.
    pub fn attach_as_render_target<D: GpuDriver>(
        &mut self,
        driver: &mut D,
    ) -> Result<RenderTarget, OffscreenError> {
        if let Some(target) = self.target {
            return Ok(target);
        }
        let texture = self.texture.ok_or(OffscreenError::SessionClosed)?;

        let framebuffer = driver.create_framebuffer().map_err(from_driver)?;
        let status = match driver.attach_color_texture(framebuffer, texture.texture, 0) {
            Ok(status) => status,
            Err(e) => {
                driver.delete_framebuffer(framebuffer);
                return Err(from_driver(e));
            }
        };
        if status != framebuffer_status::COMPLETE {
            driver.delete_framebuffer(framebuffer);
            return Err(OffscreenError::IncompleteFramebuffer { status });
        }

        let target = RenderTarget {
            framebuffer,
            width: texture.width,
            height: texture.height,
        };
        self.target = Some(target);
        Ok(target)
    }

    /// Delete the framebuffer and texture. The shared memory itself stays
    /// with its owner. Calling it again is a no-op.
    pub fn release<D: GpuDriver>(&mut self, driver: &mut D) {
        if let Some(target) = self.target.take() {
            driver.delete_framebuffer(target.framebuffer);
        }
        if let Some(texture) = self.texture.take() {
            driver.delete_texture(texture.texture);
            driver.destroy_image(texture.image);
            debug!("texture {} released", texture.texture.raw());
        }
    }

    pub fn texture(&self) -> Option<&ImportedTexture> {
        self.texture.as_ref()
    }

    pub fn target(&self) -> Option<&RenderTarget> {
        self.target.as_ref()
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.buffer.desc
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl Drop for SharedSurfaceBinding {
    fn drop(&mut self) {
        if self.texture.is_some() || self.target.is_some() {
            warn!("shared surface binding dropped without release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GraphicsContext;
    use gpu_interop::SoftwareDriver;
    use offscreen_core::{BufferUsage, ContextConfig, PixelFormat};

    fn current() -> (SoftwareDriver, GraphicsContext) {
        let mut driver = SoftwareDriver::new();
        let mut ctx = GraphicsContext::create(&mut driver, None, &ContextConfig::default()).unwrap();
        let surface = ctx.create_offscreen_surface(&mut driver, 0, 0).unwrap();
        ctx.make_current(&mut driver, surface).unwrap();
        (driver, ctx)
    }

    #[test]
    fn rejects_buffer_without_render_usage() {
        let (mut driver, mut ctx) = current();
        let desc = BufferDesc::new(4, 4, PixelFormat::Rgba8888, BufferUsage::GPU_SAMPLED_IMAGE);
        let (buffer, _) = SharedBuffer::host(desc);

        let err = SharedSurfaceBinding::import_buffer(&mut driver, buffer).unwrap_err();
        assert!(matches!(err, OffscreenError::UnsupportedBuffer(_)));
        assert_eq!(driver.resource_counts().gpu_objects(), 0);
        ctx.release(&mut driver);
    }

    #[test]
    fn incomplete_target_is_rolled_back() {
        let (mut driver, mut ctx) = current();
        let desc = BufferDesc::new(4, 4, PixelFormat::Bgra8888, BufferUsage::REQUIRED);
        let (buffer, _) = SharedBuffer::host(desc);

        let mut binding = SharedSurfaceBinding::import_buffer(&mut driver, buffer).unwrap();
        let err = binding.attach_as_render_target(&mut driver).unwrap_err();
        assert!(matches!(
            err,
            OffscreenError::IncompleteFramebuffer {
                status: framebuffer_status::UNSUPPORTED
            }
        ));
        assert_eq!(driver.resource_counts().framebuffers, 0);

        binding.release(&mut driver);
        assert_eq!(driver.resource_counts().gpu_objects(), 0);
        ctx.release(&mut driver);
    }

    #[test]
    fn attach_and_release() {
        let (mut driver, mut ctx) = current();
        let desc = BufferDesc::new(16, 8, PixelFormat::Rgbx8888, BufferUsage::REQUIRED);
        let (buffer, _) = SharedBuffer::host(desc);

        let mut binding = SharedSurfaceBinding::import_buffer(&mut driver, buffer).unwrap();
        let target = binding.attach_as_render_target(&mut driver).unwrap();
        assert_eq!((target.width, target.height), (16, 8));
        assert_eq!(binding.attach_as_render_target(&mut driver).unwrap(), target);

        let counts = driver.resource_counts();
        assert_eq!((counts.images, counts.textures, counts.framebuffers), (1, 1, 1));

        binding.release(&mut driver);
        binding.release(&mut driver);
        assert_eq!(driver.resource_counts().gpu_objects(), 0);
        ctx.release(&mut driver);
    }

    #[test]
    fn driver_without_buffer_kind_reports_unsupported() {
        let (mut driver, mut ctx) = current();
        let desc = BufferDesc::new(4, 4, PixelFormat::Rgba8888, BufferUsage::REQUIRED);
        let fd = std::fs::File::open("/dev/null").unwrap();
        let buffer = SharedBuffer::dma_buf(desc, fd.into(), 0, None);

        let err = SharedSurfaceBinding::import_buffer(&mut driver, buffer).unwrap_err();
        assert!(matches!(err, OffscreenError::UnsupportedBuffer(_)));
        ctx.release(&mut driver);
    }
}
