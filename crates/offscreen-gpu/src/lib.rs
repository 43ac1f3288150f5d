//! Offscreen rendering into cross-process shared buffers.
//!
//! This crate ties together [`offscreen_core`] (buffers, fences, errors) and
//! [`gpu_interop`] (the GL ES / EGL driver seam) into a session that renders
//! into one externally allocated buffer and hands out a waitable fence per
//! frame.
//!
//! # Overview
//!
//! - [`GraphicsContext`] owns the rendering context and its placeholder
//!   surface.
//! - [`SharedSurfaceBinding`] imports the shared buffer as a texture and
//!   builds the render target on it.
//! - [`FrameRenderer`] holds the draw program and issues the per-frame draw.
//! - [`FrameFence`] exports a native fence after each frame.
//! - [`OffscreenSession`] sequences them: configure → render* → destroy.
//! - [`OffscreenService`] is the three-operation interface an IPC layer
//!   drives; [`SessionWorker`] implements it on a dedicated GPU thread.

pub mod context;
pub mod fence;
pub mod pipeline;
pub mod service;
pub mod session;
pub mod texture;
pub mod worker;

// Re-export primary types at crate root for convenience.
pub use context::GraphicsContext;
pub use fence::FrameFence;
pub use pipeline::FrameRenderer;
pub use service::OffscreenService;
pub use session::OffscreenSession;
pub use texture::{ImportedTexture, RenderTarget, SharedSurfaceBinding};
pub use worker::{SessionStatus, SessionWorker};

pub use gpu_interop;
pub use offscreen_core;
