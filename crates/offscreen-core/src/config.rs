//! Session configuration.

use std::borrow::Cow;

use bitflags::bitflags;

/// Pass-through vertex stage: clip-space position and texture coordinate.
pub const DEFAULT_VERTEX_SHADER: &str = "\
precision mediump float;
attribute vec4 a_position;
attribute vec4 a_texcoord;
varying vec4 v_texcoord;
void main() {
    gl_Position = a_position;
    v_texcoord = a_texcoord;
}
";

/// Deterministic pattern: red and green follow the texture coordinate.
pub const DEFAULT_FRAGMENT_SHADER: &str = "\
precision mediump float;
varying vec4 v_texcoord;
uniform sampler2D u_texture;
void main() {
    gl_FragColor = vec4(v_texcoord.xy, 0.0, 1.0);
}
";

bitflags! {
    /// Context creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextFlags: u32 {
        /// Ask for a config usable with Android's recordable surfaces.
        const RECORDABLE = 0x01;
        /// Try GL ES 3 before falling back to GL ES 2.
        const TRY_GLES3 = 0x02;
        /// Request reset notification so device loss can be observed.
        const ROBUST = 0x04;
    }
}

/// GL ES API tier of a rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiTier {
    Gles3,
    Gles2,
}

impl ApiTier {
    pub fn client_version(self) -> i32 {
        match self {
            ApiTier::Gles3 => 3,
            ApiTier::Gles2 => 2,
        }
    }

    /// Tiers to attempt, best first.
    pub fn candidates(flags: ContextFlags) -> &'static [ApiTier] {
        if flags.contains(ContextFlags::TRY_GLES3) {
            &[ApiTier::Gles3, ApiTier::Gles2]
        } else {
            &[ApiTier::Gles2]
        }
    }
}

/// When the rendering context is created and released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextScope {
    /// Created by `configure`, released by `destroy`.
    #[default]
    Session,
    /// Created with the session object, released when it is dropped.
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    pub flags: ContextFlags,
    pub scope: ContextScope,
    /// Size of the placeholder pbuffer. Nothing is presented, so zero is fine.
    pub surface_size: (u32, u32),
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            flags: ContextFlags::TRY_GLES3,
            scope: ContextScope::Session,
            surface_size: (0, 0),
        }
    }
}

/// How the quad combines with the cleared background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Quad output replaces the background.
    #[default]
    Replace,
    /// Quad output is added to the background, saturating.
    Additive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// RGBA, each channel in `0.0..=1.0`.
    pub clear_color: [f32; 4],
    pub blend: BlendMode,
    pub vertex_shader: Cow<'static, str>,
    pub fragment_shader: Cow<'static, str>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            blend: BlendMode::Replace,
            vertex_shader: Cow::Borrowed(DEFAULT_VERTEX_SHADER),
            fragment_shader: Cow::Borrowed(DEFAULT_FRAGMENT_SHADER),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionConfig {
    pub context: ContextConfig,
    pub render: RenderConfig,
}

impl SessionConfig {
    pub fn with_context_flags(mut self, flags: ContextFlags) -> Self {
        self.context.flags = flags;
        self
    }

    pub fn with_context_scope(mut self, scope: ContextScope) -> Self {
        self.context.scope = scope;
        self
    }

    pub fn with_clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.render.clear_color = rgba;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.render.blend = blend;
        self
    }

    pub fn with_shaders(
        mut self,
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.render.vertex_shader = vertex.into();
        self.render.fragment_shader = fragment.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_fallback_order() {
        assert_eq!(
            ApiTier::candidates(ContextFlags::TRY_GLES3),
            &[ApiTier::Gles3, ApiTier::Gles2]
        );
        assert_eq!(ApiTier::candidates(ContextFlags::empty()), &[ApiTier::Gles2]);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = SessionConfig::default()
            .with_clear_color([0.5, 0.0, 0.0, 1.0])
            .with_blend(BlendMode::Additive)
            .with_context_scope(ContextScope::Service);
        assert_eq!(config.render.clear_color, [0.5, 0.0, 0.0, 1.0]);
        assert_eq!(config.render.blend, BlendMode::Additive);
        assert_eq!(config.context.scope, ContextScope::Service);
        assert!(config.context.flags.contains(ContextFlags::TRY_GLES3));
        assert_eq!(config.render.fragment_shader, DEFAULT_FRAGMENT_SHADER);
    }
}
