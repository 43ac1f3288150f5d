//! Error kinds reported by an offscreen session.

use std::fmt;

/// Shader pipeline stage named in compile diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    /// Program link, after both stages compiled.
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Link => "link",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OffscreenError {
    /// No GL ES tier could be created on this display.
    #[error("context creation failed: {0}")]
    ContextCreation(String),

    #[error("unsupported shared buffer: {0}")]
    UnsupportedBuffer(String),

    #[error("configured size {width}x{height} does not match buffer size {buffer_width}x{buffer_height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        buffer_width: u32,
        buffer_height: u32,
    },

    /// The driver rejected the color attachment. `status` is the
    /// `glCheckFramebufferStatus` value.
    #[error("render target incomplete (status 0x{status:04x})")]
    IncompleteFramebuffer { status: u32 },

    #[error("{stage} shader failed: {log}")]
    ShaderCompilation { stage: ShaderStage, log: String },

    #[error("frame fence unavailable: {0}")]
    FenceCreation(String),

    #[error("no GL context is current on this thread")]
    NoCurrentContext,

    #[error("session is already configured")]
    AlreadyConfigured,

    #[error("session has been destroyed")]
    SessionClosed,

    #[error("GPU device lost")]
    DeviceLost,

    /// Any other driver failure during configuration or drawing.
    #[error("driver call failed: {0}")]
    Driver(String),

    /// The thread that owns the session is no longer running.
    #[error("session worker stopped")]
    WorkerStopped,
}

impl OffscreenError {
    /// Errors after which the session can never produce frames again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OffscreenError::ContextCreation(_)
                | OffscreenError::DeviceLost
                | OffscreenError::SessionClosed
                | OffscreenError::WorkerStopped
        )
    }

    /// Errors raised by `configure` that leave the session `Uninitialized`.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OffscreenError::UnsupportedBuffer(_)
                | OffscreenError::DimensionMismatch { .. }
                | OffscreenError::IncompleteFramebuffer { .. }
                | OffscreenError::ShaderCompilation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_details() {
        let err = OffscreenError::ShaderCompilation {
            stage: ShaderStage::Fragment,
            log: "0:3: syntax error".into(),
        };
        assert_eq!(err.to_string(), "fragment shader failed: 0:3: syntax error");

        let err = OffscreenError::IncompleteFramebuffer { status: 0x8CDD };
        assert_eq!(err.to_string(), "render target incomplete (status 0x8cdd)");
    }

    #[test]
    fn classification() {
        assert!(OffscreenError::DeviceLost.is_fatal());
        assert!(!OffscreenError::FenceCreation("x".into()).is_fatal());
        assert!(OffscreenError::UnsupportedBuffer("x".into()).is_configuration_error());
        assert!(!OffscreenError::NoCurrentContext.is_configuration_error());
    }
}
