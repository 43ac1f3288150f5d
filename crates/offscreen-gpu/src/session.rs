//! [`OffscreenSession`]: configure → render* → destroy.

use std::marker::PhantomData;

use tracing::{debug, error, trace, warn};

use gpu_interop::{ContextId, DeviceStatus, GpuDriver, ResourceCounts, SurfaceId};
use offscreen_core::{
    ApiTier, ContextScope, FrameCompletion, OffscreenError, SessionConfig, SessionState,
    SharedBuffer,
};

use crate::context::{from_driver, GraphicsContext};
use crate::fence::FrameFence;
use crate::pipeline::FrameRenderer;
use crate::texture::SharedSurfaceBinding;

/// One shared surface rendered by one GPU context.
///
/// Every call must come from the thread that created the session, which the
/// type enforces by being neither `Send` nor `Sync`. Use
/// [`SessionWorker`](crate::SessionWorker) to drive a session from other
/// threads.
pub struct OffscreenSession<D: GpuDriver> {
    driver: D,
    config: SessionConfig,
    share: Option<ContextId>,
    state: SessionState,

    context: Option<GraphicsContext>,
    surface: Option<SurfaceId>,
    binding: Option<SharedSurfaceBinding>,
    renderer: Option<FrameRenderer>,
    fence: FrameFence,

    frames_rendered: u64,
    device_lost: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<D: GpuDriver> OffscreenSession<D> {
    /// With [`ContextScope::Service`] the context is created here and a
    /// failure is returned as [`OffscreenError::ContextCreation`].
    pub fn new(driver: D, config: SessionConfig) -> Result<Self, OffscreenError> {
        Self::build(driver, config, None)
    }

    /// Like [`new`](Self::new), sharing objects with an existing context of
    /// the same driver.
    pub fn with_share_context(
        driver: D,
        config: SessionConfig,
        share: ContextId,
    ) -> Result<Self, OffscreenError> {
        Self::build(driver, config, Some(share))
    }

    fn build(
        driver: D,
        config: SessionConfig,
        share: Option<ContextId>,
    ) -> Result<Self, OffscreenError> {
        let mut session = Self {
            driver,
            config,
            share,
            state: SessionState::Uninitialized,
            context: None,
            surface: None,
            binding: None,
            renderer: None,
            fence: FrameFence::new(),
            frames_rendered: 0,
            device_lost: false,
            _thread_bound: PhantomData,
        };
        if session.config.context.scope == ContextScope::Service {
            session.ensure_context()?;
        }
        debug!(
            "offscreen session created on {} driver ({:?} scope)",
            session.driver.name(),
            session.config.context.scope
        );
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Bind `buffer` as the render target. `width` and `height` must match
    /// the buffer. On failure every object created here is released and the
    /// session stays `Uninitialized`.
    pub fn configure(
        &mut self,
        buffer: SharedBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), OffscreenError> {
        match self.state {
            SessionState::Destroyed => return Err(OffscreenError::SessionClosed),
            _ if self.device_lost => return Err(OffscreenError::DeviceLost),
            SessionState::Configured => return Err(OffscreenError::AlreadyConfigured),
            SessionState::Uninitialized => {}
        }
        let desc = buffer.desc;
        if width == 0 || height == 0 || width != desc.width || height != desc.height {
            return Err(OffscreenError::DimensionMismatch {
                width,
                height,
                buffer_width: desc.width,
                buffer_height: desc.height,
            });
        }

        let created_context = self.ensure_context()?;
        if let Err(e) = self.build_resources(buffer) {
            warn!("configure {width}x{height} failed: {e}");
            if e == OffscreenError::DeviceLost {
                self.device_lost = true;
            }
            self.release_resources(created_context);
            return Err(e);
        }

        self.state = SessionState::Configured;
        debug!("session configured: {width}x{height} {:?}", desc.format);
        Ok(())
    }

    /// Draw one frame and return its completion signal.
    ///
    /// `Ok(None)` before `configure`. A frame whose fence could not be
    /// exported is still drawn and flushed and comes back as
    /// [`FrameCompletion::Unconfirmed`].
    pub fn render(&mut self) -> Result<Option<FrameCompletion>, OffscreenError> {
        match self.state {
            SessionState::Destroyed => return Err(OffscreenError::SessionClosed),
            _ if self.device_lost => return Err(OffscreenError::DeviceLost),
            SessionState::Uninitialized => return Ok(None),
            SessionState::Configured => {}
        }

        let result = self.draw_frame();
        if let Err(OffscreenError::DeviceLost) = result {
            self.mark_device_lost();
        }
        result.map(Some)
    }

    /// Release the render target, texture, program and (with
    /// [`ContextScope::Session`]) the context. A no-op while `Uninitialized`
    /// and after a previous `destroy`. Never fails, even after device loss.
    pub fn destroy(&mut self) {
        if self.state != SessionState::Configured {
            return;
        }
        let release_context = self.config.context.scope == ContextScope::Session;
        self.release_resources(release_context);
        self.state = SessionState::Destroyed;
        debug!("session destroyed after {} frames", self.frames_rendered);
    }

    // -----------------------------------------------------------------------
    // Extras
    // -----------------------------------------------------------------------

    /// Background color used from the next frame on.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.config.render.clear_color = rgba;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_clear_color(rgba);
        }
    }

    /// Blocking readback of the render target, RGBA8, bottom row first.
    /// `Ok(None)` before `configure`.
    pub fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<u8>>, OffscreenError> {
        match self.state {
            SessionState::Destroyed => return Err(OffscreenError::SessionClosed),
            _ if self.device_lost => return Err(OffscreenError::DeviceLost),
            SessionState::Uninitialized => return Ok(None),
            SessionState::Configured => {}
        }
        self.make_current()?;
        let target = self
            .binding
            .as_ref()
            .and_then(|binding| binding.target().copied())
            .ok_or(OffscreenError::SessionClosed)?;
        let fits = |start: i32, len: u32, limit: u32| {
            start >= 0 && i64::from(start) + i64::from(len) <= i64::from(limit)
        };
        if !fits(x, width, target.width) || !fits(y, height, target.height) {
            return Err(OffscreenError::Driver(format!(
                "glReadPixels: {width}x{height} at ({x}, {y}) outside the {}x{} target",
                target.width, target.height
            )));
        }
        self.driver.bind_framebuffer(Some(target.framebuffer()));
        self.driver
            .read_pixels(x, y, width, height)
            .map(Some)
            .map_err(from_driver)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames drawn so far; also the number of the last frame.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    pub fn resource_counts(&self) -> ResourceCounts {
        self.driver.resource_counts()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn context_id(&self) -> Option<ContextId> {
        self.context.as_ref().and_then(GraphicsContext::id)
    }

    pub fn context_tier(&self) -> Option<ApiTier> {
        self.context.as_ref().map(GraphicsContext::tier)
    }

    pub fn frame_fence(&self) -> &FrameFence {
        &self.fence
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Create the context and its surface if there is none. Returns whether
    /// this call created them.
    fn ensure_context(&mut self) -> Result<bool, OffscreenError> {
        if self.context.is_some() {
            return Ok(false);
        }
        let mut context = GraphicsContext::create(&mut self.driver, self.share, &self.config.context)?;
        let (width, height) = self.config.context.surface_size;
        match context.create_offscreen_surface(&mut self.driver, width, height) {
            Ok(surface) => {
                self.surface = Some(surface);
                self.context = Some(context);
                Ok(true)
            }
            Err(e) => {
                context.release(&mut self.driver);
                Err(OffscreenError::ContextCreation(e.to_string()))
            }
        }
    }

    fn make_current(&mut self) -> Result<(), OffscreenError> {
        let (Some(context), Some(surface)) = (self.context.as_ref(), self.surface) else {
            return Err(OffscreenError::NoCurrentContext);
        };
        if context.is_current(&self.driver) {
            return Ok(());
        }
        context.make_current(&mut self.driver, surface)
    }

    fn build_resources(&mut self, buffer: SharedBuffer) -> Result<(), OffscreenError> {
        self.make_current()?;

        let binding = self
            .binding
            .insert(SharedSurfaceBinding::import_buffer(&mut self.driver, buffer)?);
        binding.attach_as_render_target(&mut self.driver)?;

        let renderer = FrameRenderer::compile(&mut self.driver, &self.config.render)?;
        self.renderer = Some(renderer);
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<FrameCompletion, OffscreenError> {
        self.make_current()?;

        let (Some(binding), Some(renderer)) = (self.binding.as_ref(), self.renderer.as_ref()) else {
            return Err(OffscreenError::SessionClosed);
        };
        let (Some(texture), Some(target)) = (binding.texture(), binding.target()) else {
            return Err(OffscreenError::SessionClosed);
        };
        renderer.draw(&mut self.driver, texture, target)?;
        self.driver.flush();

        if self.driver.reset_status() == DeviceStatus::Lost {
            return Err(OffscreenError::DeviceLost);
        }

        self.frames_rendered += 1;
        let frame = self.frames_rendered;
        match self.fence.signal_frame_complete(&mut self.driver, frame) {
            Ok(handle) => {
                trace!("frame {frame} submitted");
                Ok(FrameCompletion::Fenced(handle))
            }
            Err(OffscreenError::DeviceLost) => Err(OffscreenError::DeviceLost),
            Err(error) => {
                warn!("frame {frame} has no completion fence: {error}");
                Ok(FrameCompletion::Unconfirmed { frame, error })
            }
        }
    }

    fn mark_device_lost(&mut self) {
        if !self.device_lost {
            error!("GPU device lost after {} frames", self.frames_rendered);
        }
        self.device_lost = true;
    }

    /// Release per-configuration objects, and the context when asked.
    fn release_resources(&mut self, release_context: bool) {
        if self.binding.is_some() || self.renderer.is_some() {
            if let Err(e) = self.make_current() {
                // Objects die with the context; the deletes below only keep
                // the driver's bookkeeping straight.
                debug!("releasing without a current context: {e}");
            }
        }
        if let Some(mut renderer) = self.renderer.take() {
            renderer.release(&mut self.driver);
        }
        if let Some(mut binding) = self.binding.take() {
            binding.release(&mut self.driver);
        }
        if release_context {
            self.release_context();
        }
    }

    fn release_context(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.release(&mut self.driver);
        }
        self.surface = None;
    }
}

impl<D: GpuDriver> Drop for OffscreenSession<D> {
    fn drop(&mut self) {
        self.destroy();
        self.release_context();
    }
}
