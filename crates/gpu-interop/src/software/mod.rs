//! [`SoftwareDriver`]: a CPU reference implementation of [`GpuDriver`].
//!
//! Every object lives in a table, so [`GpuDriver::resource_counts`] is exact
//! and leaks show up in tests. Draw commands are recorded and only executed
//! by `flush`/`finish` (or anything that implicitly flushes), the way a GL
//! command stream is. The quad is always shaded with the texture coordinate
//! pattern `(u, v, 0, 1)`; shader sources are validated but not executed.
//!
//! Native fences are pipes: the read end is exported once the commands
//! before the fence have run, with a byte already written, so it polls
//! readable.

mod raster;

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use offscreen_core::{
    ApiTier, BlendMode, BufferDesc, BufferSource, ContextFlags, HostBuffer, PixelFormat,
    ShaderStage, SharedBuffer,
};

use crate::driver::{
    framebuffer_status, BufferId, ContextId, DeviceStatus, DriverError, FramebufferId, GpuDriver,
    ImageId, ProgramId, ResourceCounts, ShaderId, SurfaceId, SyncId, TextureId,
};
use raster::Viewport;

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Faults {
    native_fences_disabled: AtomicBool,
    device_lost: AtomicBool,
}

/// Switches that make a [`SoftwareDriver`] fail the way real devices do.
///
/// Clones share state, so a test can keep one while the driver moves to
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    faults: Arc<Faults>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a display without `EGL_ANDROID_native_fence_sync`.
    pub fn disable_native_fences(&self) {
        self.faults.native_fences_disabled.store(true, Ordering::SeqCst);
    }

    pub fn enable_native_fences(&self) {
        self.faults.native_fences_disabled.store(false, Ordering::SeqCst);
    }

    /// Mark the device lost: `make_current` reports `EGL_CONTEXT_LOST`,
    /// `reset_status` reports a reset and draws are dropped.
    pub fn lose_device(&self) {
        self.faults.device_lost.store(true, Ordering::SeqCst);
    }

    /// Undo [`lose_device`](Self::lose_device), for a replacement device.
    pub fn restore_device(&self) {
        self.faults.device_lost.store(false, Ordering::SeqCst);
    }

    fn native_fences_disabled(&self) -> bool {
        self.faults.native_fences_disabled.load(Ordering::SeqCst)
    }

    fn device_lost(&self) -> bool {
        self.faults.device_lost.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct SoftImage {
    desc: BufferDesc,
    memory: HostBuffer,
}

enum Command {
    Clear {
        target: ImageId,
        rgba: [f32; 4],
    },
    Quad {
        target: ImageId,
        viewport: Viewport,
        blend: BlendMode,
    },
}

pub struct SoftwareDriver {
    tiers: Vec<ApiTier>,
    faults: FaultInjector,
    next_name: u32,

    contexts: HashMap<ContextId, ApiTier>,
    surfaces: HashMap<SurfaceId, ContextId>,
    current: Option<(ContextId, SurfaceId)>,

    images: HashMap<ImageId, SoftImage>,
    textures: HashMap<TextureId, Option<ImageId>>,
    framebuffers: HashMap<FramebufferId, Option<TextureId>>,
    shaders: HashMap<ShaderId, ShaderStage>,
    programs: HashSet<ProgramId>,
    buffers: HashSet<BufferId>,
    syncs: HashSet<SyncId>,

    bound_framebuffer: Option<FramebufferId>,
    viewport: Viewport,
    blend: BlendMode,
    queue: Vec<Command>,
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDriver {
    /// A driver that offers GL ES 3 and GL ES 2 contexts.
    pub fn new() -> Self {
        Self::with_tiers(&[ApiTier::Gles3, ApiTier::Gles2])
    }

    /// A driver that can only create contexts of `tiers`. An empty slice
    /// models a display without any usable config.
    pub fn with_tiers(tiers: &[ApiTier]) -> Self {
        Self {
            tiers: tiers.to_vec(),
            faults: FaultInjector::new(),
            next_name: 1,
            contexts: HashMap::new(),
            surfaces: HashMap::new(),
            current: None,
            images: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashSet::new(),
            buffers: HashSet::new(),
            syncs: HashSet::new(),
            bound_framebuffer: None,
            viewport: Viewport::default(),
            blend: BlendMode::Replace,
            queue: Vec::new(),
        }
    }

    /// Share fault switches with an existing injector.
    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    /// Tier of a live context.
    pub fn context_tier(&self, context: ContextId) -> Option<ApiTier> {
        self.contexts.get(&context).copied()
    }

    /// Number of recorded commands not yet executed.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    fn name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn require_current(&self) -> Result<(), DriverError> {
        if self.faults.device_lost() {
            return Err(DriverError::ContextLost);
        }
        match self.current {
            Some(_) => Ok(()),
            None => Err(DriverError::NotCurrent),
        }
    }

    /// Whether recorded draws can land anywhere.
    fn drawable(&self) -> bool {
        self.current.is_some() && !self.faults.device_lost()
    }

    /// Image behind the bound framebuffer's color attachment.
    fn bound_target(&self) -> Option<ImageId> {
        let fbo = self.bound_framebuffer?;
        let texture = (*self.framebuffers.get(&fbo)?)?;
        let image = (*self.textures.get(&texture)?)?;
        self.images.contains_key(&image).then_some(image)
    }

    fn execute(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        trace!(commands = self.queue.len(), "software: executing");
        for command in self.queue.drain(..) {
            match command {
                Command::Clear { target, rgba } => {
                    if let Some(image) = self.images.get(&target) {
                        let mut memory = image.memory.lock();
                        raster::clear(&mut memory, &image.desc, rgba);
                    }
                }
                Command::Quad {
                    target,
                    viewport,
                    blend,
                } => {
                    if let Some(image) = self.images.get(&target) {
                        let mut memory = image.memory.lock();
                        raster::draw_texcoord_quad(&mut memory, &image.desc, viewport, blend);
                    }
                }
            }
        }
    }
}

fn signaled_pipe() -> io::Result<OwnedFd> {
    let mut fds = [0; 2];
    // SAFETY: `fds` has room for the two descriptors pipe() writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe() succeeded, so both descriptors are open and unowned.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&read, &write] {
        // SAFETY: plain fcntl on a descriptor we own.
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    let byte = [1u8];
    // SAFETY: writes one byte from a live buffer to an open pipe.
    if unsafe { libc::write(write.as_raw_fd(), byte.as_ptr().cast(), 1) } != 1 {
        return Err(io::Error::last_os_error());
    }
    Ok(read)
}

fn has_entry_point(source: &str) -> bool {
    source.contains("void main")
}

impl GpuDriver for SoftwareDriver {
    fn name(&self) -> &'static str {
        "software"
    }

    // -- context --------------------------------------------------------

    fn create_context(
        &mut self,
        share: Option<ContextId>,
        tier: ApiTier,
        flags: ContextFlags,
    ) -> Result<ContextId, DriverError> {
        if !self.tiers.contains(&tier) {
            return Err(DriverError::call(
                "eglChooseConfig",
                format!("no config for GL ES {}", tier.client_version()),
            ));
        }
        if let Some(share) = share {
            if !self.contexts.contains_key(&share) {
                return Err(DriverError::call("eglCreateContext", "EGL_BAD_CONTEXT"));
            }
        }
        let id = ContextId(self.name());
        self.contexts.insert(id, tier);
        debug!(context = id.0, ?tier, ?flags, "software: context created");
        Ok(id)
    }

    fn create_pbuffer_surface(
        &mut self,
        context: ContextId,
        _width: u32,
        _height: u32,
    ) -> Result<SurfaceId, DriverError> {
        if !self.contexts.contains_key(&context) {
            return Err(DriverError::call("eglCreatePbufferSurface", "EGL_BAD_CONTEXT"));
        }
        let id = SurfaceId(self.name());
        self.surfaces.insert(id, context);
        Ok(id)
    }

    fn make_current(&mut self, context: ContextId, surface: SurfaceId) -> Result<(), DriverError> {
        if self.faults.device_lost() {
            return Err(DriverError::ContextLost);
        }
        if !self.contexts.contains_key(&context) {
            return Err(DriverError::call("eglMakeCurrent", "EGL_BAD_CONTEXT"));
        }
        if !self.surfaces.contains_key(&surface) {
            return Err(DriverError::call("eglMakeCurrent", "EGL_BAD_SURFACE"));
        }
        if self.current.map(|(c, _)| c) != Some(context) {
            self.bound_framebuffer = None;
        }
        self.current = Some((context, surface));
        Ok(())
    }

    fn current_context(&self) -> Option<ContextId> {
        self.current.map(|(context, _)| context)
    }

    fn release_current(&mut self) {
        // Unbinding a context flushes it.
        self.execute();
        self.current = None;
        self.bound_framebuffer = None;
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
        if self.current.map(|(_, s)| s) == Some(surface) {
            self.current = None;
        }
    }

    fn destroy_context(&mut self, context: ContextId) {
        if self.contexts.remove(&context).is_some() {
            debug!(context = context.0, "software: context destroyed");
        }
        if self.current_context() == Some(context) {
            self.execute();
            self.current = None;
        }
    }

    // -- external images --------------------------------------------------

    fn import_buffer(&mut self, buffer: &SharedBuffer) -> Result<ImageId, DriverError> {
        let memory = match &buffer.source {
            BufferSource::Host(memory) => memory.clone(),
            other => return Err(DriverError::Unsupported(format!("{} import", other.kind()))),
        };
        let desc = buffer.desc;
        let needed = desc
            .layout_len()
            .map_err(|e| DriverError::call("eglCreateImageKHR", format!("EGL_BAD_PARAMETER: {e}")))?;
        if memory.len() < needed {
            return Err(DriverError::call(
                "eglCreateImageKHR",
                format!(
                    "EGL_BAD_PARAMETER: {} bytes cannot hold {}x{} with stride {}",
                    memory.len(),
                    desc.width,
                    desc.height,
                    desc.stride
                ),
            ));
        }
        let id = ImageId(self.name());
        self.images.insert(id, SoftImage { desc, memory });
        Ok(id)
    }

    fn destroy_image(&mut self, image: ImageId) {
        self.images.remove(&image);
    }

    fn create_texture(&mut self) -> Result<TextureId, DriverError> {
        self.require_current()?;
        let id = TextureId(self.name());
        self.textures.insert(id, None);
        Ok(id)
    }

    fn bind_image_to_texture(
        &mut self,
        texture: TextureId,
        image: ImageId,
    ) -> Result<(), DriverError> {
        self.require_current()?;
        if !self.images.contains_key(&image) {
            return Err(DriverError::call("glEGLImageTargetTexture2DOES", "GL_INVALID_VALUE"));
        }
        match self.textures.get_mut(&texture) {
            Some(storage) => {
                *storage = Some(image);
                Ok(())
            }
            None => Err(DriverError::call("glEGLImageTargetTexture2DOES", "GL_INVALID_OPERATION")),
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    // -- render target ----------------------------------------------------

    fn create_framebuffer(&mut self) -> Result<FramebufferId, DriverError> {
        self.require_current()?;
        let id = FramebufferId(self.name());
        self.framebuffers.insert(id, None);
        Ok(id)
    }

    fn attach_color_texture(
        &mut self,
        framebuffer: FramebufferId,
        texture: TextureId,
        level: i32,
    ) -> Result<u32, DriverError> {
        self.require_current()?;
        let storage = *self
            .textures
            .get(&texture)
            .ok_or_else(|| DriverError::call("glFramebufferTexture2D", "GL_INVALID_OPERATION"))?;
        let attachment = self
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| DriverError::call("glFramebufferTexture2D", "GL_INVALID_OPERATION"))?;
        if level != 0 {
            return Err(DriverError::call("glFramebufferTexture2D", "GL_INVALID_VALUE"));
        }
        *attachment = Some(texture);

        let status = match storage.and_then(|image| self.images.get(&image)) {
            None => framebuffer_status::INCOMPLETE_ATTACHMENT,
            Some(image) if image.desc.format == PixelFormat::Bgra8888 => {
                framebuffer_status::UNSUPPORTED
            }
            Some(_) => framebuffer_status::COMPLETE,
        };
        Ok(status)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bound_framebuffer = framebuffer.filter(|fbo| self.framebuffers.contains_key(fbo));
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
    }

    // -- program ----------------------------------------------------------

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, DriverError> {
        self.require_current()?;
        if stage == ShaderStage::Link {
            return Err(DriverError::call("glCreateShader", "GL_INVALID_ENUM"));
        }
        if !has_entry_point(source) {
            return Err(DriverError::Diagnostic {
                call: "glCompileShader",
                log: "ERROR: 0:1: '' : missing function definition for main()".to_owned(),
            });
        }
        let id = ShaderId(self.name());
        self.shaders.insert(id, stage);
        Ok(id)
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        _attributes: &[(u32, &str)],
    ) -> Result<ProgramId, DriverError> {
        self.require_current()?;
        let stages = (self.shaders.get(&vertex), self.shaders.get(&fragment));
        if stages != (Some(&ShaderStage::Vertex), Some(&ShaderStage::Fragment)) {
            return Err(DriverError::Diagnostic {
                call: "glLinkProgram",
                log: "ERROR: program needs one compiled vertex and one compiled fragment shader"
                    .to_owned(),
            });
        }
        let id = ProgramId(self.name());
        self.programs.insert(id);
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_quad_buffer(&mut self) -> Result<BufferId, DriverError> {
        self.require_current()?;
        let id = BufferId(self.name());
        self.buffers.insert(id);
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    // -- draw -------------------------------------------------------------

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = Viewport {
            x,
            y,
            width,
            height,
        };
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        if !self.drawable() {
            return;
        }
        if let Some(target) = self.bound_target() {
            self.queue.push(Command::Clear { target, rgba });
        }
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn draw_quad(
        &mut self,
        program: ProgramId,
        quad: BufferId,
        texture: Option<TextureId>,
    ) -> Result<(), DriverError> {
        self.require_current()?;
        if !self.programs.contains(&program) || !self.buffers.contains(&quad) {
            return Err(DriverError::call("glDrawArrays", "GL_INVALID_OPERATION"));
        }
        if let Some(texture) = texture {
            if !self.textures.contains_key(&texture) {
                return Err(DriverError::call("glBindTexture", "GL_INVALID_VALUE"));
            }
        }
        if let Some(target) = self.bound_target() {
            self.queue.push(Command::Quad {
                target,
                viewport: self.viewport,
                blend: self.blend,
            });
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.execute();
    }

    fn finish(&mut self) {
        self.execute();
    }

    // -- fences -----------------------------------------------------------

    fn create_native_fence(&mut self) -> Result<SyncId, DriverError> {
        self.require_current()?;
        if self.faults.native_fences_disabled() {
            return Err(DriverError::Unsupported(
                "EGL_ANDROID_native_fence_sync".to_owned(),
            ));
        }
        let id = SyncId(self.name());
        self.syncs.insert(id);
        Ok(id)
    }

    fn export_fence_fd(&mut self, sync: SyncId) -> Result<OwnedFd, DriverError> {
        if !self.syncs.contains(&sync) {
            return Err(DriverError::call("eglDupNativeFenceFDANDROID", "EGL_BAD_PARAMETER"));
        }
        // The fence sits after everything recorded so far.
        self.execute();
        signaled_pipe().map_err(|e| DriverError::call("eglDupNativeFenceFDANDROID", e))
    }

    fn destroy_sync(&mut self, sync: SyncId) {
        self.syncs.remove(&sync);
    }

    // -- diagnostics ------------------------------------------------------

    fn reset_status(&mut self) -> DeviceStatus {
        if self.faults.device_lost() {
            DeviceStatus::Lost
        } else {
            DeviceStatus::Ok
        }
    }

    fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, DriverError> {
        self.require_current()?;
        let target = self
            .bound_target()
            .ok_or_else(|| DriverError::call("glReadPixels", "GL_INVALID_FRAMEBUFFER_OPERATION"))?;
        self.execute();
        let image = self
            .images
            .get(&target)
            .ok_or_else(|| DriverError::call("glReadPixels", "GL_INVALID_FRAMEBUFFER_OPERATION"))?;
        if !raster::contains(&image.desc, x, y, width, height) {
            return Err(DriverError::call(
                "glReadPixels",
                format!(
                    "GL_INVALID_VALUE: {width}x{height} at ({x}, {y}) outside {}x{}",
                    image.desc.width, image.desc.height
                ),
            ));
        }
        let memory = image.memory.lock();
        Ok(raster::read_rgba(&memory, &image.desc, x, y, width, height))
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            contexts: self.contexts.len(),
            surfaces: self.surfaces.len(),
            images: self.images.len(),
            textures: self.textures.len(),
            framebuffers: self.framebuffers.len(),
            shaders: self.shaders.len(),
            programs: self.programs.len(),
            buffers: self.buffers.len(),
            syncs: self.syncs.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offscreen_core::{BufferUsage, DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER};

    fn current(driver: &mut SoftwareDriver) -> (ContextId, SurfaceId) {
        let context = driver
            .create_context(None, ApiTier::Gles3, ContextFlags::empty())
            .unwrap();
        let surface = driver.create_pbuffer_surface(context, 1, 1).unwrap();
        driver.make_current(context, surface).unwrap();
        (context, surface)
    }

    fn target(driver: &mut SoftwareDriver, format: PixelFormat) -> (HostBuffer, FramebufferId, u32) {
        let desc = BufferDesc::new(8, 8, format, BufferUsage::REQUIRED);
        let (buffer, memory) = SharedBuffer::host(desc);
        let image = driver.import_buffer(&buffer).unwrap();
        let texture = driver.create_texture().unwrap();
        driver.bind_image_to_texture(texture, image).unwrap();
        let fbo = driver.create_framebuffer().unwrap();
        let status = driver.attach_color_texture(fbo, texture, 0).unwrap();
        (memory, fbo, status)
    }

    #[test]
    fn tier_and_share_checks() {
        let mut driver = SoftwareDriver::with_tiers(&[ApiTier::Gles2]);
        assert!(driver
            .create_context(None, ApiTier::Gles3, ContextFlags::TRY_GLES3)
            .is_err());
        let context = driver
            .create_context(None, ApiTier::Gles2, ContextFlags::empty())
            .unwrap();
        assert_eq!(driver.context_tier(context), Some(ApiTier::Gles2));
        assert!(driver
            .create_context(Some(ContextId(999)), ApiTier::Gles2, ContextFlags::empty())
            .is_err());
        assert!(driver
            .create_context(Some(context), ApiTier::Gles2, ContextFlags::empty())
            .is_ok());
    }

    #[test]
    fn gl_calls_need_a_current_context() {
        let mut driver = SoftwareDriver::new();
        assert!(matches!(driver.create_texture(), Err(DriverError::NotCurrent)));
        current(&mut driver);
        assert!(driver.create_texture().is_ok());
    }

    #[test]
    fn draws_run_on_flush() {
        let mut driver = SoftwareDriver::new();
        current(&mut driver);
        let (memory, fbo, status) = target(&mut driver, PixelFormat::Rgba8888);
        assert_eq!(status, framebuffer_status::COMPLETE);

        let vs = driver.compile_shader(ShaderStage::Vertex, DEFAULT_VERTEX_SHADER).unwrap();
        let fs = driver.compile_shader(ShaderStage::Fragment, DEFAULT_FRAGMENT_SHADER).unwrap();
        let program = driver.link_program(vs, fs, &[(0, "a_position")]).unwrap();
        let quad = driver.create_quad_buffer().unwrap();

        driver.bind_framebuffer(Some(fbo));
        driver.set_viewport(0, 0, 8, 8);
        driver.clear([1.0, 1.0, 1.0, 1.0]);
        driver.draw_quad(program, quad, None).unwrap();
        assert_eq!(driver.pending_commands(), 2);
        assert_eq!(memory.pixel(32, 0, 0), Some([0, 0, 0, 0]));

        driver.flush();
        assert_eq!(driver.pending_commands(), 0);
        assert_eq!(memory.pixel(32, 0, 0), Some([16, 16, 0, 255]));
    }

    #[test]
    fn bgra_attachment_is_unsupported() {
        let mut driver = SoftwareDriver::new();
        current(&mut driver);
        let (_, _, status) = target(&mut driver, PixelFormat::Bgra8888);
        assert_eq!(status, framebuffer_status::UNSUPPORTED);
    }

    #[test]
    fn missing_main_fails_with_log() {
        let mut driver = SoftwareDriver::new();
        current(&mut driver);
        let err = driver
            .compile_shader(ShaderStage::Fragment, "precision mediump float;")
            .unwrap_err();
        assert!(matches!(err, DriverError::Diagnostic { ref log, .. } if log.contains("main")));
        assert_eq!(driver.resource_counts().shaders, 0);
    }

    #[test]
    fn exported_fence_is_signaled() {
        let mut driver = SoftwareDriver::new();
        current(&mut driver);
        let sync = driver.create_native_fence().unwrap();
        let fd = driver.export_fence_fd(sync).unwrap();
        driver.destroy_sync(sync);
        assert_eq!(driver.resource_counts().syncs, 0);

        let fence = offscreen_core::FenceHandle::new(fd, 1);
        assert!(fence.is_signaled().unwrap());
    }

    #[test]
    fn fault_injection() {
        let mut driver = SoftwareDriver::new();
        let faults = driver.fault_injector();
        let (context, surface) = current(&mut driver);

        faults.disable_native_fences();
        assert!(matches!(
            driver.create_native_fence(),
            Err(DriverError::Unsupported(_))
        ));
        faults.enable_native_fences();
        assert!(driver.create_native_fence().is_ok());

        faults.lose_device();
        assert_eq!(driver.reset_status(), DeviceStatus::Lost);
        assert!(matches!(
            driver.make_current(context, surface),
            Err(DriverError::ContextLost)
        ));
        faults.restore_device();
        assert_eq!(driver.reset_status(), DeviceStatus::Ok);
    }

    #[test]
    fn only_host_memory_imports() {
        let mut driver = SoftwareDriver::new();
        let desc = BufferDesc::new(4, 4, PixelFormat::Rgba8888, BufferUsage::REQUIRED);
        let (mut buffer, _) = SharedBuffer::host(desc);
        buffer.desc.height = 64;
        assert!(matches!(
            driver.import_buffer(&buffer),
            Err(DriverError::Call { .. })
        ));
    }

    #[test]
    fn oversized_import_is_rejected_without_overflow() {
        let mut driver = SoftwareDriver::new();
        current(&mut driver);
        let desc = BufferDesc {
            width: 0x4000_0000,
            height: 1,
            stride: 0,
            ..BufferDesc::new(1, 1, PixelFormat::Rgba8888, BufferUsage::REQUIRED)
        };
        let (buffer, _) = SharedBuffer::host(desc);
        assert!(matches!(
            driver.import_buffer(&buffer),
            Err(DriverError::Call { call: "eglCreateImageKHR", .. })
        ));
        assert_eq!(driver.resource_counts().images, 0);
    }

    #[test]
    fn readback_outside_target_is_rejected() {
        let mut driver = SoftwareDriver::new();
        current(&mut driver);
        let (_, fbo, _) = target(&mut driver, PixelFormat::Rgba8888);
        driver.bind_framebuffer(Some(fbo));
        assert!(driver.read_pixels(0, 0, 1, 1).is_ok());
        for (x, y, w, h) in [(0, 0, u32::MAX, u32::MAX), (-1, 0, 1, 1), (i32::MAX, 0, 2, 1)] {
            assert!(matches!(
                driver.read_pixels(x, y, w, h),
                Err(DriverError::Call { call: "glReadPixels", .. })
            ));
        }
    }

    #[test]
    fn counts_follow_lifetimes() {
        let mut driver = SoftwareDriver::new();
        let (context, surface) = current(&mut driver);
        let (_, fbo, _) = target(&mut driver, PixelFormat::Rgba8888);
        let counts = driver.resource_counts();
        assert_eq!(counts.images, 1);
        assert_eq!(counts.textures, 1);
        assert_eq!(counts.framebuffers, 1);

        driver.delete_framebuffer(fbo);
        driver.delete_framebuffer(fbo);
        driver.release_current();
        driver.destroy_surface(surface);
        driver.destroy_context(context);
        let counts = driver.resource_counts();
        assert_eq!(counts.framebuffers, 0);
        assert_eq!(counts.contexts, 0);
        assert_eq!(counts.surfaces, 0);
        assert_eq!(driver.current_context(), None);
    }
}
