//! Rendering context and placeholder surface lifecycle.

use tracing::{debug, warn};

use gpu_interop::{ContextId, DriverError, GpuDriver, SurfaceId};
use offscreen_core::{ApiTier, ContextConfig, OffscreenError};

/// Map a driver failure onto the session error kinds.
pub(crate) fn from_driver(err: DriverError) -> OffscreenError {
    match err {
        DriverError::ContextLost => OffscreenError::DeviceLost,
        DriverError::NotCurrent => OffscreenError::NoCurrentContext,
        other => OffscreenError::Driver(other.to_string()),
    }
}

/// A rendering context plus the off-screen surfaces created through it.
///
/// Nothing is ever presented, so surfaces only exist to make the context
/// current.
#[derive(Debug)]
pub struct GraphicsContext {
    context: Option<ContextId>,
    surfaces: Vec<SurfaceId>,
    tier: ApiTier,
}

impl GraphicsContext {
    /// Create a context, trying the best tier `config.flags` allows first.
    pub fn create<D: GpuDriver>(
        driver: &mut D,
        share: Option<ContextId>,
        config: &ContextConfig,
    ) -> Result<Self, OffscreenError> {
        let mut failures = Vec::new();
        for &tier in ApiTier::candidates(config.flags) {
            match driver.create_context(share, tier, config.flags) {
                Ok(context) => {
                    debug!(
                        "{} context {} created at GL ES {}",
                        driver.name(),
                        context.raw(),
                        tier.client_version()
                    );
                    return Ok(Self {
                        context: Some(context),
                        surfaces: Vec::new(),
                        tier,
                    });
                }
                Err(e) => {
                    debug!("GL ES {} unavailable: {e}", tier.client_version());
                    failures.push(format!("GL ES {}: {e}", tier.client_version()));
                }
            }
        }
        Err(OffscreenError::ContextCreation(failures.join("; ")))
    }

    /// Zero-sized placeholders are allowed.
    pub fn create_offscreen_surface<D: GpuDriver>(
        &mut self,
        driver: &mut D,
        width: u32,
        height: u32,
    ) -> Result<SurfaceId, OffscreenError> {
        let context = self.context.ok_or(OffscreenError::NoCurrentContext)?;
        let surface = driver
            .create_pbuffer_surface(context, width, height)
            .map_err(from_driver)?;
        self.surfaces.push(surface);
        Ok(surface)
    }

    /// Bind the context and `surface` to the calling thread.
    pub fn make_current<D: GpuDriver>(
        &self,
        driver: &mut D,
        surface: SurfaceId,
    ) -> Result<(), OffscreenError> {
        let context = self.context.ok_or(OffscreenError::NoCurrentContext)?;
        driver.make_current(context, surface).map_err(from_driver)
    }

    pub fn is_current<D: GpuDriver>(&self, driver: &D) -> bool {
        self.context.is_some() && driver.current_context() == self.context
    }

    /// Unbind and destroy the context and its surfaces. Calling it again is
    /// a no-op.
    pub fn release<D: GpuDriver>(&mut self, driver: &mut D) {
        let Some(context) = self.context.take() else {
            return;
        };
        if driver.current_context() == Some(context) {
            driver.release_current();
        }
        for surface in self.surfaces.drain(..) {
            driver.destroy_surface(surface);
        }
        driver.destroy_context(context);
        debug!("context {} released", context.raw());
    }

    pub fn id(&self) -> Option<ContextId> {
        self.context
    }

    pub fn tier(&self) -> ApiTier {
        self.tier
    }

    pub fn is_released(&self) -> bool {
        self.context.is_none()
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        if let Some(context) = self.context {
            warn!("context {} dropped without release", context.raw());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_interop::SoftwareDriver;
    use offscreen_core::ContextFlags;

    #[test]
    fn falls_back_to_gles2() {
        let mut driver = SoftwareDriver::with_tiers(&[ApiTier::Gles2]);
        let mut ctx = GraphicsContext::create(&mut driver, None, &ContextConfig::default()).unwrap();
        assert_eq!(ctx.tier(), ApiTier::Gles2);
        ctx.release(&mut driver);
    }

    #[test]
    fn no_tier_is_context_creation_error() {
        let mut driver = SoftwareDriver::with_tiers(&[]);
        let err = GraphicsContext::create(&mut driver, None, &ContextConfig::default()).unwrap_err();
        assert!(matches!(err, OffscreenError::ContextCreation(ref msg) if msg.contains("GL ES 3")));
    }

    #[test]
    fn gles2_only_when_not_asked_for_gles3() {
        let mut driver = SoftwareDriver::new();
        let config = ContextConfig {
            flags: ContextFlags::empty(),
            ..Default::default()
        };
        let mut ctx = GraphicsContext::create(&mut driver, None, &config).unwrap();
        assert_eq!(ctx.tier(), ApiTier::Gles2);
        ctx.release(&mut driver);
    }

    #[test]
    fn release_is_idempotent() {
        let mut driver = SoftwareDriver::new();
        let mut ctx = GraphicsContext::create(&mut driver, None, &ContextConfig::default()).unwrap();
        let surface = ctx.create_offscreen_surface(&mut driver, 0, 0).unwrap();
        ctx.make_current(&mut driver, surface).unwrap();
        assert!(ctx.is_current(&driver));

        ctx.release(&mut driver);
        ctx.release(&mut driver);
        assert!(ctx.is_released());
        assert!(driver.resource_counts().is_empty());
        assert!(matches!(
            ctx.make_current(&mut driver, surface),
            Err(OffscreenError::NoCurrentContext)
        ));
    }
}
