//! The draw program and the per-frame draw.

use tracing::{debug, trace};

use gpu_interop::{
    BufferId, DriverError, GpuDriver, ProgramId, ShaderId, ATTRIB_POSITION, ATTRIB_TEXCOORD,
};
use offscreen_core::{BlendMode, OffscreenError, RenderConfig, ShaderStage};

use crate::context::from_driver;
use crate::texture::{ImportedTexture, RenderTarget};

fn stage_error(stage: ShaderStage, err: DriverError) -> OffscreenError {
    match err {
        DriverError::Diagnostic { log, .. } => OffscreenError::ShaderCompilation { stage, log },
        other => from_driver(other),
    }
}

/// Linked program plus the full-target quad it draws.
#[derive(Debug)]
pub struct FrameRenderer {
    program: Option<ProgramId>,
    quad: Option<BufferId>,
    clear_color: [f32; 4],
    blend: BlendMode,
}

impl FrameRenderer {
    /// Compile and link `config`'s shaders. Attribute slots are bound before
    /// linking: `a_position` and `a_texcoord`.
    pub fn compile<D: GpuDriver>(
        driver: &mut D,
        config: &RenderConfig,
    ) -> Result<Self, OffscreenError> {
        let vertex = driver
            .compile_shader(ShaderStage::Vertex, &config.vertex_shader)
            .map_err(|e| stage_error(ShaderStage::Vertex, e))?;
        let fragment = match driver.compile_shader(ShaderStage::Fragment, &config.fragment_shader) {
            Ok(fragment) => fragment,
            Err(e) => {
                driver.delete_shader(vertex);
                return Err(stage_error(ShaderStage::Fragment, e));
            }
        };

        let linked = driver.link_program(
            vertex,
            fragment,
            &[(ATTRIB_POSITION, "a_position"), (ATTRIB_TEXCOORD, "a_texcoord")],
        );
        delete_shaders(driver, [vertex, fragment]);
        let program = linked.map_err(|e| stage_error(ShaderStage::Link, e))?;

        let quad = match driver.create_quad_buffer() {
            Ok(quad) => quad,
            Err(e) => {
                driver.delete_program(program);
                return Err(from_driver(e));
            }
        };

        debug!("draw program {} linked", program.raw());
        Ok(Self {
            program: Some(program),
            quad: Some(quad),
            clear_color: config.clear_color,
            blend: config.blend,
        })
    }

    /// Clear `target` and draw the quad over all of it, sampling `texture`.
    /// Leaves the program, viewport and framebuffer bound.
    pub fn draw<D: GpuDriver>(
        &self,
        driver: &mut D,
        texture: &ImportedTexture,
        target: &RenderTarget,
    ) -> Result<(), OffscreenError> {
        let (Some(program), Some(quad)) = (self.program, self.quad) else {
            return Err(OffscreenError::SessionClosed);
        };
        trace!("draw {}x{}", target.width, target.height);

        driver.bind_framebuffer(Some(target.framebuffer));
        driver.set_viewport(0, 0, target.width, target.height);
        driver.clear(self.clear_color);
        driver.set_blend(self.blend);
        driver
            .draw_quad(program, quad, Some(texture.texture))
            .map_err(from_driver)
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn blend(&self) -> BlendMode {
        self.blend
    }

    pub fn release<D: GpuDriver>(&mut self, driver: &mut D) {
        if let Some(quad) = self.quad.take() {
            driver.delete_buffer(quad);
        }
        if let Some(program) = self.program.take() {
            driver.delete_program(program);
        }
    }
}

// Linked programs keep their own copy of the stages.
fn delete_shaders<D: GpuDriver>(driver: &mut D, shaders: [ShaderId; 2]) {
    for shader in shaders {
        driver.delete_shader(shader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GraphicsContext;
    use gpu_interop::SoftwareDriver;
    use offscreen_core::{ContextConfig, DEFAULT_VERTEX_SHADER};
    use std::borrow::Cow;

    fn current() -> (SoftwareDriver, GraphicsContext) {
        let mut driver = SoftwareDriver::new();
        let mut ctx = GraphicsContext::create(&mut driver, None, &ContextConfig::default()).unwrap();
        let surface = ctx.create_offscreen_surface(&mut driver, 0, 0).unwrap();
        ctx.make_current(&mut driver, surface).unwrap();
        (driver, ctx)
    }

    #[test]
    fn compile_keeps_only_program_and_quad() {
        let (mut driver, mut ctx) = current();
        let mut renderer = FrameRenderer::compile(&mut driver, &RenderConfig::default()).unwrap();
        let counts = driver.resource_counts();
        assert_eq!((counts.shaders, counts.programs, counts.buffers), (0, 1, 1));

        renderer.release(&mut driver);
        renderer.release(&mut driver);
        assert_eq!(driver.resource_counts().gpu_objects(), 0);
        ctx.release(&mut driver);
    }

    #[test]
    fn fragment_failure_carries_stage_and_log() {
        let (mut driver, mut ctx) = current();
        let config = RenderConfig {
            vertex_shader: Cow::Borrowed(DEFAULT_VERTEX_SHADER),
            fragment_shader: Cow::Borrowed("precision mediump float;"),
            ..Default::default()
        };
        let err = FrameRenderer::compile(&mut driver, &config).unwrap_err();
        match err {
            OffscreenError::ShaderCompilation { stage, log } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(driver.resource_counts().gpu_objects(), 0);
        ctx.release(&mut driver);
    }

    #[test]
    fn compile_without_context_is_reported() {
        let mut driver = SoftwareDriver::new();
        let err = FrameRenderer::compile(&mut driver, &RenderConfig::default()).unwrap_err();
        assert!(matches!(err, OffscreenError::NoCurrentContext));
    }
}
