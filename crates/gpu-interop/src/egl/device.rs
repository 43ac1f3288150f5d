//! EGL display wrapper.
//!
//! Loads libEGL at runtime, initialises the default display and resolves the
//! extension entry points the driver needs. Holds no contexts; those belong
//! to [`EglDriver`](super::EglDriver).

use std::collections::HashSet;
use std::ffi::c_void;

use khronos_egl as egl;
use tracing::{debug, warn};

use offscreen_core::{ApiTier, ContextFlags};

use crate::driver::DriverError;

pub type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

// ---------------------------------------------------------------------------
// Extension constants
// ---------------------------------------------------------------------------

pub(crate) const OPENGL_ES3_BIT: egl::Int = 0x0040;
pub(crate) const RECORDABLE_ANDROID: egl::Int = 0x3142;

pub(crate) const CONTEXT_OPENGL_ROBUST_ACCESS: egl::Int = 0x30BF;
pub(crate) const CONTEXT_OPENGL_RESET_NOTIFICATION_STRATEGY: egl::Int = 0x3138;
pub(crate) const LOSE_CONTEXT_ON_RESET: egl::Int = 0x31BF;

pub(crate) const LINUX_DMA_BUF: egl::Enum = 0x3270;
pub(crate) const LINUX_DRM_FOURCC: egl::Int = 0x3271;
pub(crate) const DMA_BUF_PLANE0_FD: egl::Int = 0x3272;
pub(crate) const DMA_BUF_PLANE0_OFFSET: egl::Int = 0x3273;
pub(crate) const DMA_BUF_PLANE0_PITCH: egl::Int = 0x3274;
pub(crate) const DMA_BUF_PLANE0_MODIFIER_LO: egl::Int = 0x3443;
pub(crate) const DMA_BUF_PLANE0_MODIFIER_HI: egl::Int = 0x3444;

pub(crate) const NATIVE_BUFFER_ANDROID: egl::Enum = 0x3140;
pub(crate) const IMAGE_PRESERVED: egl::Int = 0x30D2;

pub(crate) const SYNC_NATIVE_FENCE_ANDROID: egl::Enum = 0x3144;
pub(crate) const SYNC_NATIVE_FENCE_FD_ANDROID: egl::Int = 0x3145;
pub(crate) const NO_NATIVE_FENCE_FD_ANDROID: egl::Int = -1;

// ---------------------------------------------------------------------------
// Extension function pointer types
// ---------------------------------------------------------------------------

pub type EglCreateImageKhr = unsafe extern "system" fn(
    display: *mut c_void,
    context: *mut c_void,
    target: egl::Enum,
    buffer: *mut c_void,
    attrib_list: *const egl::Int,
) -> *mut c_void;
pub type EglDestroyImageKhr =
    unsafe extern "system" fn(display: *mut c_void, image: *mut c_void) -> egl::Boolean;
pub type GlEglImageTargetTexture2dOes = unsafe extern "system" fn(target: u32, image: *mut c_void);
pub type EglCreateSyncKhr = unsafe extern "system" fn(
    display: *mut c_void,
    kind: egl::Enum,
    attrib_list: *const egl::Int,
) -> *mut c_void;
pub type EglDestroySyncKhr =
    unsafe extern "system" fn(display: *mut c_void, sync: *mut c_void) -> egl::Boolean;
pub type EglDupNativeFenceFdAndroid =
    unsafe extern "system" fn(display: *mut c_void, sync: *mut c_void) -> egl::Int;
pub type EglGetNativeClientBufferAndroid =
    unsafe extern "system" fn(buffer: *const c_void) -> *mut c_void;
pub type GlGetGraphicsResetStatus = unsafe extern "system" fn() -> u32;

/// Extension entry points. Each is `None` when the implementation does not
/// export it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionProcs {
    pub create_image: Option<EglCreateImageKhr>,
    pub destroy_image: Option<EglDestroyImageKhr>,
    pub image_target_texture: Option<GlEglImageTargetTexture2dOes>,
    pub create_sync: Option<EglCreateSyncKhr>,
    pub destroy_sync: Option<EglDestroySyncKhr>,
    pub dup_native_fence_fd: Option<EglDupNativeFenceFdAndroid>,
    pub get_native_client_buffer: Option<EglGetNativeClientBufferAndroid>,
    pub graphics_reset_status: Option<GlGetGraphicsResetStatus>,
}

impl ExtensionProcs {
    fn load(egl: &EglInstance) -> Self {
        /// # Safety
        ///
        /// `F` must be the function pointer type of `name`.
        unsafe fn load<F: Copy>(egl: &EglInstance, name: &str) -> Option<F> {
            let f = egl.get_proc_address(name)?;
            Some(unsafe { std::mem::transmute_copy::<extern "system" fn(), F>(&f) })
        }

        // SAFETY: every type alias above mirrors the Khronos prototype of the
        // entry point it is loaded from.
        unsafe {
            Self {
                create_image: load(egl, "eglCreateImageKHR"),
                destroy_image: load(egl, "eglDestroyImageKHR"),
                image_target_texture: load(egl, "glEGLImageTargetTexture2DOES"),
                create_sync: load(egl, "eglCreateSyncKHR"),
                destroy_sync: load(egl, "eglDestroySyncKHR"),
                dup_native_fence_fd: load(egl, "eglDupNativeFenceFDANDROID"),
                get_native_client_buffer: load(egl, "eglGetNativeClientBufferANDROID"),
                graphics_reset_status: load(egl, "glGetGraphicsResetStatus")
                    .or_else(|| load(egl, "glGetGraphicsResetStatusKHR"))
                    .or_else(|| load(egl, "glGetGraphicsResetStatusEXT")),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EglDevice
// ---------------------------------------------------------------------------

/// The default EGL display, initialised for GL ES.
pub struct EglDevice {
    egl: EglInstance,
    display: egl::Display,
    version: (egl::Int, egl::Int),
    extensions: HashSet<String>,
    procs: ExtensionProcs,
}

impl EglDevice {
    pub fn new() -> Result<Self, DriverError> {
        // SAFETY: loading libEGL only runs the library's own initialisers.
        let egl = unsafe { EglInstance::load_required() }
            .map_err(|e| DriverError::call("dlopen(libEGL)", format!("{e:?}")))?;

        // SAFETY: EGL_DEFAULT_DISPLAY is always a valid display id.
        let display = unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| DriverError::call("eglGetDisplay", "EGL_NO_DISPLAY"))?;
        let version = egl
            .initialize(display)
            .map_err(|e| DriverError::call("eglInitialize", e))?;
        egl.bind_api(egl::OPENGL_ES_API)
            .map_err(|e| DriverError::call("eglBindAPI", e))?;

        let extensions: HashSet<String> = match egl.query_string(Some(display), egl::EXTENSIONS) {
            Ok(list) => list
                .to_string_lossy()
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            Err(e) => {
                warn!("eglQueryString(EGL_EXTENSIONS) failed: {e}");
                HashSet::new()
            }
        };
        let procs = ExtensionProcs::load(&egl);

        debug!(
            "EGL {}.{} initialised, {} extensions",
            version.0,
            version.1,
            extensions.len()
        );

        Ok(Self {
            egl,
            display,
            version,
            extensions,
            procs,
        })
    }

    pub fn egl(&self) -> &EglInstance {
        &self.egl
    }

    pub fn display(&self) -> egl::Display {
        self.display
    }

    pub fn version(&self) -> (egl::Int, egl::Int) {
        self.version
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn procs(&self) -> &ExtensionProcs {
        &self.procs
    }

    /// RGBA8 pbuffer config renderable with `tier`.
    pub fn choose_config(
        &self,
        tier: ApiTier,
        flags: ContextFlags,
    ) -> Result<egl::Config, DriverError> {
        let renderable = match tier {
            ApiTier::Gles3 => OPENGL_ES3_BIT,
            ApiTier::Gles2 => egl::OPENGL_ES2_BIT,
        };
        let mut attribs = vec![
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::RENDERABLE_TYPE,
            renderable,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::ALPHA_SIZE,
            8,
        ];
        if flags.contains(ContextFlags::RECORDABLE) && self.has_extension("EGL_ANDROID_recordable") {
            attribs.extend([RECORDABLE_ANDROID, egl::TRUE as egl::Int]);
        }
        attribs.push(egl::NONE);

        self.egl
            .choose_first_config(self.display, &attribs)
            .map_err(|e| DriverError::call("eglChooseConfig", e))?
            .ok_or_else(|| {
                DriverError::call(
                    "eglChooseConfig",
                    format!("no RGBA8 pbuffer config for GL ES {}", tier.client_version()),
                )
            })
    }

    /// Context attributes for `tier`, with reset notification when asked
    /// for and available.
    pub fn context_attributes(&self, tier: ApiTier, flags: ContextFlags) -> Vec<egl::Int> {
        let mut attribs = vec![egl::CONTEXT_CLIENT_VERSION, tier.client_version()];
        if flags.contains(ContextFlags::ROBUST) {
            if self.has_extension("EGL_EXT_create_context_robustness") {
                attribs.extend([
                    CONTEXT_OPENGL_ROBUST_ACCESS,
                    egl::TRUE as egl::Int,
                    CONTEXT_OPENGL_RESET_NOTIFICATION_STRATEGY,
                    LOSE_CONTEXT_ON_RESET,
                ]);
            } else {
                debug!("EGL_EXT_create_context_robustness missing, device loss only via eglMakeCurrent");
            }
        }
        attribs.push(egl::NONE);
        attribs
    }
}

impl Drop for EglDevice {
    fn drop(&mut self) {
        if let Err(e) = self.egl.terminate(self.display) {
            warn!("eglTerminate failed: {e}");
        }
    }
}
