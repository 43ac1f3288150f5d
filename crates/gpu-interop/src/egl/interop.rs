//! [`EglDriver`]: [`GpuDriver`] on a real EGL display.
//!
//! External buffers become `EGLImage`s (`EGL_EXT_image_dma_buf_import` on
//! Linux, `EGL_ANDROID_get_native_client_buffer` on Android) and back a
//! `GL_TEXTURE_2D` through `GL_OES_EGL_image`. Frame fences are
//! `EGL_ANDROID_native_fence_sync` objects exported as `sync_file` fds.

use std::collections::{HashMap, HashSet};
use std::ffi::{c_void, CString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;

use gl::types::{GLchar, GLenum, GLint, GLsizei, GLsizeiptr, GLuint};
use khronos_egl as egl;
use tracing::{debug, error, warn};

use offscreen_core::{ApiTier, BlendMode, BufferSource, ContextFlags, ShaderStage, SharedBuffer};

use super::device::{self, EglDevice};
use crate::driver::{
    BufferId, ContextId, DeviceStatus, DriverError, FramebufferId, GpuDriver, ImageId, ProgramId,
    ResourceCounts, ShaderId, SurfaceId, SyncId, TextureId, ATTRIB_POSITION, ATTRIB_TEXCOORD,
    FULLSCREEN_QUAD, QUAD_STRIDE,
};

const GL_CONTEXT_LOST: GLenum = 0x0507;

/// GL entry points are process-global in the `gl` crate.

struct EglContext {
    context: egl::Context,
    config: egl::Config,
}

pub struct EglDriver {
    device: EglDevice,
    next_handle: u32,

    contexts: HashMap<ContextId, EglContext>,
    surfaces: HashMap<SurfaceId, egl::Surface>,
    images: HashMap<ImageId, *mut c_void>,
    syncs: HashMap<SyncId, *mut c_void>,

    textures: HashSet<GLuint>,
    framebuffers: HashSet<GLuint>,
    shaders: HashSet<GLuint>,
    programs: HashSet<GLuint>,
    buffers: HashSet<GLuint>,

    bound_framebuffer: GLuint,
    gl_loaded: bool,
}

impl EglDriver {
    /// Open the default EGL display.
    pub fn new() -> Result<Self, DriverError> {
        Ok(Self::with_device(EglDevice::new()?))
    }

    pub fn with_device(device: EglDevice) -> Self {
        Self {
            device,
            next_handle: 1,
            contexts: HashMap::new(),
            surfaces: HashMap::new(),
            images: HashMap::new(),
            syncs: HashMap::new(),
            textures: HashSet::new(),
            framebuffers: HashSet::new(),
            shaders: HashSet::new(),
            programs: HashSet::new(),
            buffers: HashSet::new(),
            bound_framebuffer: 0,
            gl_loaded: false,
        }
    }

    pub fn device(&self) -> &EglDevice {
        &self.device
    }

    fn handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn egl_error(&self, call: &'static str) -> DriverError {
        match self.device.egl().get_error() {
            Some(egl::Error::ContextLost) => DriverError::ContextLost,
            Some(e) => DriverError::call(call, e),
            None => DriverError::call(call, "no EGL error reported"),
        }
    }

    fn require_current(&self) -> Result<(), DriverError> {
        match self.device.egl().get_current_context() {
            Some(_) => Ok(()),
            None => Err(DriverError::NotCurrent),
        }
    }

    /// Point the `gl` entry points at this driver's library. Each driver
    /// loads once, so a replacement driver never runs on a dropped one's
    /// pointers.
    fn load_gl(&mut self) {
        if self.gl_loaded {
            return;
        }
        let egl = self.device.egl();
        gl::load_with(|name| {
            egl.get_proc_address(name)
                .map_or(ptr::null(), |f| f as *const c_void)
        });
        self.gl_loaded = true;
        debug!("GL ES entry points loaded");
    }

    fn import_dma_buf(
        &self,
        buffer: &SharedBuffer,
        create: device::EglCreateImageKhr,
    ) -> Result<*mut c_void, DriverError> {
        let BufferSource::DmaBuf {
            fd,
            offset,
            modifier,
        } = &buffer.source
        else {
            return Err(DriverError::Unsupported(buffer.source.kind().to_owned()));
        };
        if !self.device.has_extension("EGL_EXT_image_dma_buf_import") {
            return Err(DriverError::Unsupported("EGL_EXT_image_dma_buf_import".to_owned()));
        }

        let desc = buffer.desc;
        // Width, height and stride fit an EGLint once the layout checks out.
        desc.layout_len().map_err(|e| {
            DriverError::call("eglCreateImageKHR", format!("EGL_BAD_PARAMETER: {e}"))
        })?;
        let offset = egl::Int::try_from(*offset).map_err(|_| {
            DriverError::call(
                "eglCreateImageKHR",
                format!("EGL_BAD_PARAMETER: plane offset {offset} exceeds EGLint"),
            )
        })?;
        let mut attribs = vec![
            egl::WIDTH,
            desc.width as egl::Int,
            egl::HEIGHT,
            desc.height as egl::Int,
            device::LINUX_DRM_FOURCC,
            desc.format.drm_fourcc() as egl::Int,
            device::DMA_BUF_PLANE0_FD,
            fd.as_raw_fd(),
            device::DMA_BUF_PLANE0_OFFSET,
            offset,
            device::DMA_BUF_PLANE0_PITCH,
            desc.stride as egl::Int,
        ];
        if let Some(modifier) = modifier {
            if !self.device.has_extension("EGL_EXT_image_dma_buf_import_modifiers") {
                return Err(DriverError::Unsupported(
                    "EGL_EXT_image_dma_buf_import_modifiers".to_owned(),
                ));
            }
            attribs.extend([
                device::DMA_BUF_PLANE0_MODIFIER_LO,
                (*modifier & 0xffff_ffff) as u32 as egl::Int,
                device::DMA_BUF_PLANE0_MODIFIER_HI,
                (*modifier >> 32) as u32 as egl::Int,
            ]);
        }
        attribs.push(egl::NONE);

        // SAFETY: the attribute list is NONE-terminated and the fd stays open
        // for the duration of the call; EGL dups what it keeps.
        let image = unsafe {
            create(
                self.device.display().as_ptr(),
                ptr::null_mut(),
                device::LINUX_DMA_BUF,
                ptr::null_mut(),
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            return Err(self.egl_error("eglCreateImageKHR"));
        }
        Ok(image)
    }

    fn import_hardware_buffer(
        &self,
        buffer: &SharedBuffer,
        create: device::EglCreateImageKhr,
    ) -> Result<*mut c_void, DriverError> {
        let BufferSource::HardwareBuffer(hardware_buffer) = &buffer.source else {
            return Err(DriverError::Unsupported(buffer.source.kind().to_owned()));
        };
        let get_client_buffer = self
            .device
            .procs()
            .get_native_client_buffer
            .ok_or_else(|| DriverError::Unsupported("eglGetNativeClientBufferANDROID".to_owned()))?;

        // SAFETY: the caller guarantees the AHardwareBuffer is alive.
        let client_buffer = unsafe { get_client_buffer(hardware_buffer.as_ptr()) };
        if client_buffer.is_null() {
            return Err(self.egl_error("eglGetNativeClientBufferANDROID"));
        }

        let attribs = [device::IMAGE_PRESERVED, egl::TRUE as egl::Int, egl::NONE];
        // SAFETY: client_buffer came from eglGetNativeClientBufferANDROID and
        // the attribute list is NONE-terminated.
        let image = unsafe {
            create(
                self.device.display().as_ptr(),
                ptr::null_mut(),
                device::NATIVE_BUFFER_ANDROID,
                client_buffer,
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            return Err(self.egl_error("eglCreateImageKHR"));
        }
        Ok(image)
    }
}

// ---------------------------------------------------------------------------
// GL helpers
// ---------------------------------------------------------------------------

fn check_gl(call: &'static str) -> Result<(), DriverError> {
    // SAFETY: glGetError has no preconditions beyond a current context.
    let err = unsafe { gl::GetError() };
    match err {
        gl::NO_ERROR => Ok(()),
        GL_CONTEXT_LOST => Err(DriverError::ContextLost),
        other => Err(DriverError::call(call, format!("GL error 0x{other:04x}"))),
    }
}

fn shader_info_log(shader: GLuint) -> String {
    let mut len: GLint = 0;
    // SAFETY: `shader` is a live shader object and the buffer is sized from
    // GL_INFO_LOG_LENGTH.
    unsafe {
        gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
        let mut buf = vec![0u8; len.max(1) as usize];
        let mut written: GLsizei = 0;
        gl::GetShaderInfoLog(shader, len, &mut written, buf.as_mut_ptr() as *mut GLchar);
        String::from_utf8_lossy(&buf[..written.max(0) as usize]).into_owned()
    }
}

fn program_info_log(program: GLuint) -> String {
    let mut len: GLint = 0;
    // SAFETY: as for shader_info_log.
    unsafe {
        gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len);
        let mut buf = vec![0u8; len.max(1) as usize];
        let mut written: GLsizei = 0;
        gl::GetProgramInfoLog(program, len, &mut written, buf.as_mut_ptr() as *mut GLchar);
        String::from_utf8_lossy(&buf[..written.max(0) as usize]).into_owned()
    }
}

fn c_string(call: &'static str, value: &str) -> Result<CString, DriverError> {
    CString::new(value).map_err(|_| DriverError::call(call, "string contains a NUL byte"))
}

// ---------------------------------------------------------------------------
// GpuDriver
// ---------------------------------------------------------------------------

impl GpuDriver for EglDriver {
    fn name(&self) -> &'static str {
        "egl"
    }

    // -- context --------------------------------------------------------

    fn create_context(
        &mut self,
        share: Option<ContextId>,
        tier: ApiTier,
        flags: ContextFlags,
    ) -> Result<ContextId, DriverError> {
        let config = self.device.choose_config(tier, flags)?;
        let share_context = match share {
            Some(id) => Some(
                self.contexts
                    .get(&id)
                    .ok_or_else(|| DriverError::call("eglCreateContext", "unknown share context"))?
                    .context,
            ),
            None => None,
        };
        let attribs = self.device.context_attributes(tier, flags);
        let context = self
            .device
            .egl()
            .create_context(self.device.display(), config, share_context, &attribs)
            .map_err(|e| DriverError::call("eglCreateContext", e))?;

        let id = ContextId(self.handle());
        self.contexts.insert(id, EglContext { context, config });
        debug!("EGL context {} created (GL ES {})", id.0, tier.client_version());
        Ok(id)
    }

    fn create_pbuffer_surface(
        &mut self,
        context: ContextId,
        width: u32,
        height: u32,
    ) -> Result<SurfaceId, DriverError> {
        let config = self
            .contexts
            .get(&context)
            .ok_or_else(|| DriverError::call("eglCreatePbufferSurface", "unknown context"))?
            .config;
        let size = |value: u32| {
            egl::Int::try_from(value).map_err(|_| {
                DriverError::call("eglCreatePbufferSurface", format!("EGL_BAD_PARAMETER: {value}"))
            })
        };
        let attribs = [egl::WIDTH, size(width)?, egl::HEIGHT, size(height)?, egl::NONE];
        let surface = self
            .device
            .egl()
            .create_pbuffer_surface(self.device.display(), config, &attribs)
            .map_err(|e| DriverError::call("eglCreatePbufferSurface", e))?;
        let id = SurfaceId(self.handle());
        self.surfaces.insert(id, surface);
        Ok(id)
    }

    fn make_current(&mut self, context: ContextId, surface: SurfaceId) -> Result<(), DriverError> {
        let egl_context = self
            .contexts
            .get(&context)
            .ok_or_else(|| DriverError::call("eglMakeCurrent", "unknown context"))?
            .context;
        let egl_surface = *self
            .surfaces
            .get(&surface)
            .ok_or_else(|| DriverError::call("eglMakeCurrent", "unknown surface"))?;

        self.device
            .egl()
            .make_current(
                self.device.display(),
                Some(egl_surface),
                Some(egl_surface),
                Some(egl_context),
            )
            .map_err(|e| match e {
                egl::Error::ContextLost => DriverError::ContextLost,
                e => DriverError::call("eglMakeCurrent", e),
            })?;
        self.load_gl();
        Ok(())
    }

    fn current_context(&self) -> Option<ContextId> {
        let current = self.device.egl().get_current_context()?;
        self.contexts
            .iter()
            .find(|(_, c)| c.context.as_ptr() == current.as_ptr())
            .map(|(id, _)| *id)
    }

    fn release_current(&mut self) {
        if let Err(e) = self
            .device
            .egl()
            .make_current(self.device.display(), None, None, None)
        {
            warn!("eglMakeCurrent(EGL_NO_CONTEXT) failed: {e}");
        }
        self.bound_framebuffer = 0;
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if let Some(surface) = self.surfaces.remove(&surface) {
            if let Err(e) = self
                .device
                .egl()
                .destroy_surface(self.device.display(), surface)
            {
                warn!("eglDestroySurface failed: {e}");
            }
        }
    }

    fn destroy_context(&mut self, context: ContextId) {
        if let Some(EglContext { context: ctx, .. }) = self.contexts.remove(&context) {
            if let Err(e) = self.device.egl().destroy_context(self.device.display(), ctx) {
                warn!("eglDestroyContext failed: {e}");
            }
            debug!("EGL context {} destroyed", context.0);
        }
    }

    // -- external images --------------------------------------------------

    fn import_buffer(&mut self, buffer: &SharedBuffer) -> Result<ImageId, DriverError> {
        let create = self
            .device
            .procs()
            .create_image
            .ok_or_else(|| DriverError::Unsupported("EGL_KHR_image_base".to_owned()))?;

        let image = match &buffer.source {
            BufferSource::DmaBuf { .. } => self.import_dma_buf(buffer, create)?,
            BufferSource::HardwareBuffer(_) => self.import_hardware_buffer(buffer, create)?,
            BufferSource::Host(_) => {
                return Err(DriverError::Unsupported("host memory import".to_owned()))
            }
        };

        let id = ImageId(self.handle());
        self.images.insert(id, image);
        Ok(id)
    }

    fn destroy_image(&mut self, image: ImageId) {
        let Some(raw) = self.images.remove(&image) else {
            return;
        };
        match self.device.procs().destroy_image {
            // SAFETY: `raw` was created on this display and is destroyed once.
            Some(destroy) => unsafe {
                destroy(self.device.display().as_ptr(), raw);
            },
            None => error!("eglDestroyImageKHR missing, EGLImage leaked"),
        }
    }

    fn create_texture(&mut self) -> Result<TextureId, DriverError> {
        self.require_current()?;
        let mut name: GLuint = 0;
        // SAFETY: writes one texture name into `name`.
        unsafe { gl::GenTextures(1, &mut name) };
        check_gl("glGenTextures")?;
        self.textures.insert(name);
        Ok(TextureId(name))
    }

    fn bind_image_to_texture(
        &mut self,
        texture: TextureId,
        image: ImageId,
    ) -> Result<(), DriverError> {
        self.require_current()?;
        let raw = *self
            .images
            .get(&image)
            .ok_or_else(|| DriverError::call("glEGLImageTargetTexture2DOES", "unknown image"))?;
        let target_texture = self
            .device
            .procs()
            .image_target_texture
            .ok_or_else(|| DriverError::Unsupported("GL_OES_EGL_image".to_owned()))?;

        // SAFETY: `texture` is a live texture name of the current context and
        // `raw` a live EGLImage.
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, texture.0);
            target_texture(gl::TEXTURE_2D, raw);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }
        check_gl("glEGLImageTargetTexture2DOES")
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture.0) {
            // SAFETY: deletes a name this driver generated.
            unsafe { gl::DeleteTextures(1, &texture.0) };
        }
    }

    // -- render target ----------------------------------------------------

    fn create_framebuffer(&mut self) -> Result<FramebufferId, DriverError> {
        self.require_current()?;
        let mut name: GLuint = 0;
        // SAFETY: writes one framebuffer name into `name`.
        unsafe { gl::GenFramebuffers(1, &mut name) };
        check_gl("glGenFramebuffers")?;
        self.framebuffers.insert(name);
        Ok(FramebufferId(name))
    }

    fn attach_color_texture(
        &mut self,
        framebuffer: FramebufferId,
        texture: TextureId,
        level: i32,
    ) -> Result<u32, DriverError> {
        self.require_current()?;
        // SAFETY: both names are live objects of the current context.
        let status = unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer.0);
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                texture.0,
                level,
            );
            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
            gl::BindFramebuffer(gl::FRAMEBUFFER, self.bound_framebuffer);
            status
        };
        check_gl("glFramebufferTexture2D")?;
        Ok(status)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        let name = framebuffer.map_or(0, |fbo| fbo.0);
        // SAFETY: 0 or a live framebuffer name.
        unsafe { gl::BindFramebuffer(gl::FRAMEBUFFER, name) };
        self.bound_framebuffer = name;
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer.0) {
            // SAFETY: deletes a name this driver generated.
            unsafe { gl::DeleteFramebuffers(1, &framebuffer.0) };
            if self.bound_framebuffer == framebuffer.0 {
                self.bound_framebuffer = 0;
            }
        }
    }

    // -- program ----------------------------------------------------------

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, DriverError> {
        self.require_current()?;
        let kind = match stage {
            ShaderStage::Vertex => gl::VERTEX_SHADER,
            ShaderStage::Fragment => gl::FRAGMENT_SHADER,
            ShaderStage::Link => return Err(DriverError::call("glCreateShader", "GL_INVALID_ENUM")),
        };
        let source = c_string("glShaderSource", source)?;

        // SAFETY: `source` outlives the glShaderSource call, which copies it.
        let shader = unsafe {
            let shader = gl::CreateShader(kind);
            gl::ShaderSource(shader, 1, &source.as_ptr(), ptr::null());
            gl::CompileShader(shader);
            shader
        };
        if shader == 0 {
            return Err(check_gl("glCreateShader")
                .err()
                .unwrap_or_else(|| DriverError::call("glCreateShader", "returned 0")));
        }

        let mut ok: GLint = 0;
        // SAFETY: `shader` is live.
        unsafe { gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut ok) };
        if ok == 0 {
            let log = shader_info_log(shader);
            // SAFETY: `shader` is live and owned by us.
            unsafe { gl::DeleteShader(shader) };
            return Err(DriverError::Diagnostic {
                call: "glCompileShader",
                log,
            });
        }
        self.shaders.insert(shader);
        Ok(ShaderId(shader))
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        attributes: &[(u32, &str)],
    ) -> Result<ProgramId, DriverError> {
        self.require_current()?;
        let names = attributes
            .iter()
            .map(|(slot, name)| c_string("glBindAttribLocation", name).map(|n| (*slot, n)))
            .collect::<Result<Vec<_>, _>>()?;

        // SAFETY: both shaders are live; attribute names outlive the calls.
        let program = unsafe {
            let program = gl::CreateProgram();
            gl::AttachShader(program, vertex.0);
            gl::AttachShader(program, fragment.0);
            for (slot, name) in &names {
                gl::BindAttribLocation(program, *slot, name.as_ptr());
            }
            gl::LinkProgram(program);
            program
        };

        let mut ok: GLint = 0;
        // SAFETY: `program` is live.
        unsafe { gl::GetProgramiv(program, gl::LINK_STATUS, &mut ok) };
        if ok == 0 {
            let log = program_info_log(program);
            // SAFETY: `program` is live and owned by us.
            unsafe { gl::DeleteProgram(program) };
            return Err(DriverError::Diagnostic {
                call: "glLinkProgram",
                log,
            });
        }
        self.programs.insert(program);
        Ok(ProgramId(program))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader.0) {
            // SAFETY: deletes a shader this driver created.
            unsafe { gl::DeleteShader(shader.0) };
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program.0) {
            // SAFETY: deletes a program this driver created.
            unsafe { gl::DeleteProgram(program.0) };
        }
    }

    fn create_quad_buffer(&mut self) -> Result<BufferId, DriverError> {
        self.require_current()?;
        let mut name: GLuint = 0;
        // SAFETY: uploads a constant array; the pointer is valid for its size.
        unsafe {
            gl::GenBuffers(1, &mut name);
            gl::BindBuffer(gl::ARRAY_BUFFER, name);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                std::mem::size_of_val(&FULLSCREEN_QUAD) as GLsizeiptr,
                FULLSCREEN_QUAD.as_ptr() as *const c_void,
                gl::STATIC_DRAW,
            );
            gl::BindBuffer(gl::ARRAY_BUFFER, 0);
        }
        check_gl("glBufferData")?;
        self.buffers.insert(name);
        Ok(BufferId(name))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer.0) {
            // SAFETY: deletes a buffer this driver created.
            unsafe { gl::DeleteBuffers(1, &buffer.0) };
        }
    }

    // -- draw -------------------------------------------------------------

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        let clamp = |value: u32| GLsizei::try_from(value).unwrap_or(GLsizei::MAX);
        // SAFETY: plain state call.
        unsafe { gl::Viewport(x, y, clamp(width), clamp(height)) };
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        let [r, g, b, a] = rgba;
        // SAFETY: plain state calls.
        unsafe {
            gl::ClearColor(r, g, b, a);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
    }

    fn set_blend(&mut self, mode: BlendMode) {
        // SAFETY: plain state calls.
        unsafe {
            match mode {
                BlendMode::Replace => gl::Disable(gl::BLEND),
                BlendMode::Additive => {
                    gl::Enable(gl::BLEND);
                    gl::BlendFunc(gl::ONE, gl::ONE);
                }
            }
        }
    }

    fn draw_quad(
        &mut self,
        program: ProgramId,
        quad: BufferId,
        texture: Option<TextureId>,
    ) -> Result<(), DriverError> {
        self.require_current()?;
        // SAFETY: program, buffer and texture are live objects of the current
        // context; attribute offsets stay within one QUAD_STRIDE.
        unsafe {
            gl::UseProgram(program.0);
            gl::BindBuffer(gl::ARRAY_BUFFER, quad.0);
            gl::EnableVertexAttribArray(ATTRIB_POSITION);
            gl::VertexAttribPointer(ATTRIB_POSITION, 2, gl::FLOAT, gl::FALSE, QUAD_STRIDE, ptr::null());
            gl::EnableVertexAttribArray(ATTRIB_TEXCOORD);
            gl::VertexAttribPointer(
                ATTRIB_TEXCOORD,
                2,
                gl::FLOAT,
                gl::FALSE,
                QUAD_STRIDE,
                (2 * std::mem::size_of::<f32>()) as *const c_void,
            );

            gl::ActiveTexture(gl::TEXTURE0);
            gl::BindTexture(gl::TEXTURE_2D, texture.map_or(0, |t| t.0));
            let sampler = gl::GetUniformLocation(program.0, c"u_texture".as_ptr());
            if sampler >= 0 {
                gl::Uniform1i(sampler, 0);
            }

            gl::DrawArrays(gl::TRIANGLE_STRIP, 0, FULLSCREEN_QUAD.len() as GLsizei);

            gl::DisableVertexAttribArray(ATTRIB_POSITION);
            gl::DisableVertexAttribArray(ATTRIB_TEXCOORD);
            gl::BindBuffer(gl::ARRAY_BUFFER, 0);
            gl::UseProgram(0);
        }
        check_gl("glDrawArrays")
    }

    fn flush(&mut self) {
        // SAFETY: no preconditions.
        unsafe { gl::Flush() };
    }

    fn finish(&mut self) {
        // SAFETY: no preconditions.
        unsafe { gl::Finish() };
    }

    // -- fences -----------------------------------------------------------

    fn create_native_fence(&mut self) -> Result<SyncId, DriverError> {
        self.require_current()?;
        if !self.device.has_extension("EGL_ANDROID_native_fence_sync") {
            return Err(DriverError::Unsupported(
                "EGL_ANDROID_native_fence_sync".to_owned(),
            ));
        }
        let create = self
            .device
            .procs()
            .create_sync
            .ok_or_else(|| DriverError::Unsupported("EGL_KHR_fence_sync".to_owned()))?;

        let attribs = [
            device::SYNC_NATIVE_FENCE_FD_ANDROID,
            device::NO_NATIVE_FENCE_FD_ANDROID,
            egl::NONE,
        ];
        // SAFETY: NONE-terminated attribute list on our display.
        let sync = unsafe {
            create(
                self.device.display().as_ptr(),
                device::SYNC_NATIVE_FENCE_ANDROID,
                attribs.as_ptr(),
            )
        };
        if sync.is_null() {
            return Err(self.egl_error("eglCreateSyncKHR"));
        }
        let id = SyncId(self.handle());
        self.syncs.insert(id, sync);
        Ok(id)
    }

    fn export_fence_fd(&mut self, sync: SyncId) -> Result<OwnedFd, DriverError> {
        let raw = *self
            .syncs
            .get(&sync)
            .ok_or_else(|| DriverError::call("eglDupNativeFenceFDANDROID", "unknown sync"))?;
        let dup = self
            .device
            .procs()
            .dup_native_fence_fd
            .ok_or_else(|| DriverError::Unsupported("eglDupNativeFenceFDANDROID".to_owned()))?;

        // SAFETY: `raw` is a live native fence sync on our display.
        let fd = unsafe { dup(self.device.display().as_ptr(), raw) };
        if fd == device::NO_NATIVE_FENCE_FD_ANDROID {
            return Err(self.egl_error("eglDupNativeFenceFDANDROID"));
        }
        // SAFETY: the fd was just duplicated for us and nothing else owns it.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn destroy_sync(&mut self, sync: SyncId) {
        let Some(raw) = self.syncs.remove(&sync) else {
            return;
        };
        if let Some(destroy) = self.device.procs().destroy_sync {
            // SAFETY: `raw` was created on this display and is destroyed once.
            unsafe { destroy(self.device.display().as_ptr(), raw) };
        }
    }

    // -- diagnostics ------------------------------------------------------

    fn reset_status(&mut self) -> DeviceStatus {
        let Some(query) = self.device.procs().graphics_reset_status else {
            return DeviceStatus::Ok;
        };
        if self.require_current().is_err() {
            return DeviceStatus::Ok;
        }
        // SAFETY: queried with a context current.
        match unsafe { query() } {
            gl::NO_ERROR => DeviceStatus::Ok,
            status => {
                error!("graphics reset detected (0x{status:04x})");
                DeviceStatus::Lost
            }
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
        let invalid =
            || DriverError::call("glReadPixels", format!("GL_INVALID_VALUE: {width}x{height}"));
        let (gl_width, gl_height) = (
            GLsizei::try_from(width).map_err(|_| invalid())?,
            GLsizei::try_from(height).map_err(|_| invalid())?,
        );
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|texels| texels.checked_mul(4))
            .ok_or_else(invalid)?;
        let mut pixels = vec![0u8; len];
        // SAFETY: `pixels` holds width * height RGBA8 texels and PACK_ALIGNMENT
        // is 1, so GL writes exactly that many bytes.
        unsafe {
            gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
            gl::ReadPixels(
                x,
                y,
                gl_width,
                gl_height,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                pixels.as_mut_ptr() as *mut c_void,
            );
        }
        check_gl("glReadPixels")?;
        Ok(pixels)
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

impl Drop for EglDriver {
    fn drop(&mut self) {
        let leaked = self.resource_counts();
        if !leaked.is_empty() {
            warn!("EGL driver dropped with live objects: {leaked:?}");
        }
        // GL objects die with their contexts; EGL objects are per display.
        self.release_current();
        for sync in self.syncs.keys().copied().collect::<Vec<_>>() {
            self.destroy_sync(sync);
        }
        for image in self.images.keys().copied().collect::<Vec<_>>() {
            self.destroy_image(image);
        }
        for surface in self.surfaces.keys().copied().collect::<Vec<_>>() {
            self.destroy_surface(surface);
        }
        for context in self.contexts.keys().copied().collect::<Vec<_>>() {
            self.destroy_context(context);
        }
    }
}
