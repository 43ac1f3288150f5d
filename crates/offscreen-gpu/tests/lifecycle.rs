mod common;

use common::host_buffer;
use gpu_interop::{GpuDriver, SoftwareDriver};
use offscreen_core::{
    ApiTier, BufferDesc, BufferUsage, OffscreenError, PixelFormat, SessionConfig, SessionState,
    SharedBuffer,
};
use offscreen_gpu::{OffscreenService, OffscreenSession};

fn session() -> OffscreenSession<SoftwareDriver> {
    common::init();
    OffscreenSession::new(SoftwareDriver::new(), SessionConfig::default()).unwrap()
}

#[test]
fn configure_then_teardown_returns_to_baseline() {
    for (width, height, format) in [
        (1, 1, PixelFormat::Rgba8888),
        (64, 64, PixelFormat::Rgba8888),
        (17, 3, PixelFormat::Rgbx8888),
    ] {
        let mut session = session();
        let baseline = session.resource_counts();
        assert!(baseline.is_empty());

        let (buffer, _) = host_buffer(width, height, format);
        session.configure(buffer, width, height).unwrap();
        let live = session.resource_counts();
        assert_eq!(live.contexts, 1);
        assert_eq!((live.images, live.textures, live.framebuffers), (1, 1, 1));
        assert_eq!((live.programs, live.buffers, live.shaders), (1, 1, 0));

        session.teardown().unwrap();
        assert_eq!(session.resource_counts(), baseline);
        assert_eq!(session.state(), SessionState::Destroyed);
    }
}

#[test]
fn render_before_configure_is_absent() {
    let mut session = session();
    for _ in 0..3 {
        assert!(session.render().unwrap().is_none());
    }
    assert!(session.resource_counts().is_empty());
    assert_eq!(session.driver().current_context(), None);
    assert_eq!(session.driver().pending_commands(), 0);
    assert_eq!(session.frames_rendered(), 0);
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn destroy_is_idempotent() {
    let mut session = session();
    let (buffer, _) = host_buffer(8, 8, PixelFormat::Rgba8888);
    session.configure(buffer, 8, 8).unwrap();
    let _ = session.render().unwrap();

    session.destroy();
    session.destroy();
    session.teardown().unwrap();
    assert!(session.resource_counts().is_empty());
    assert_eq!(session.state(), SessionState::Destroyed);
}

#[test]
fn calls_after_destroy_are_session_closed() {
    let mut session = session();
    let (buffer, _) = host_buffer(8, 8, PixelFormat::Rgba8888);
    session.configure(buffer, 8, 8).unwrap();
    session.destroy();

    assert_eq!(session.render().unwrap_err(), OffscreenError::SessionClosed);
    let (buffer, _) = host_buffer(8, 8, PixelFormat::Rgba8888);
    assert_eq!(
        session.configure(buffer, 8, 8).unwrap_err(),
        OffscreenError::SessionClosed
    );
    assert_eq!(
        session.read_pixels(0, 0, 1, 1).unwrap_err(),
        OffscreenError::SessionClosed
    );
}

#[test]
fn destroy_while_uninitialized_is_noop() {
    let mut session = session();
    session.destroy();
    assert_eq!(session.state(), SessionState::Uninitialized);

    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);
    session.configure(buffer, 4, 4).unwrap();
    assert_eq!(session.state(), SessionState::Configured);
}

#[test]
fn buffer_without_renderable_usage_is_rejected() {
    let mut session = session();
    let desc = BufferDesc::new(
        16,
        16,
        PixelFormat::Rgba8888,
        BufferUsage::GPU_SAMPLED_IMAGE | BufferUsage::CPU_READ,
    );
    let (buffer, _) = SharedBuffer::host(desc);

    let err = session.configure(buffer, 16, 16).unwrap_err();
    assert!(matches!(err, OffscreenError::UnsupportedBuffer(_)));
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(session.resource_counts().is_empty());

    let (buffer, _) = host_buffer(16, 16, PixelFormat::Rgba8888);
    session.configure(buffer, 16, 16).unwrap();
}

#[test]
fn incomplete_framebuffer_rolls_back() {
    let mut session = session();
    let (buffer, _) = host_buffer(4, 4, PixelFormat::Bgra8888);

    let err = session.configure(buffer, 4, 4).unwrap_err();
    assert!(matches!(err, OffscreenError::IncompleteFramebuffer { .. }));
    assert!(err.is_configuration_error());
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(session.resource_counts().is_empty());
}

#[test]
fn shader_failure_rolls_back_with_diagnostics() {
    common::init();
    let config = SessionConfig::default().with_shaders(
        offscreen_core::DEFAULT_VERTEX_SHADER,
        "precision mediump float; gl_FragColor = vec4(1.0);",
    );
    let mut session = OffscreenSession::new(SoftwareDriver::new(), config).unwrap();
    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);

    match session.configure(buffer, 4, 4).unwrap_err() {
        OffscreenError::ShaderCompilation { stage, log } => {
            assert_eq!(stage, offscreen_core::ShaderStage::Fragment);
            assert!(log.contains("main"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(session.resource_counts().is_empty());
}

#[test]
fn no_context_tier_fails_configure() {
    common::init();
    let mut session =
        OffscreenSession::new(SoftwareDriver::with_tiers(&[]), SessionConfig::default()).unwrap();
    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);

    let err = session.configure(buffer, 4, 4).unwrap_err();
    assert!(matches!(err, OffscreenError::ContextCreation(_)));
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn falls_back_to_gles2() {
    common::init();
    let mut session = OffscreenSession::new(
        SoftwareDriver::with_tiers(&[ApiTier::Gles2]),
        SessionConfig::default(),
    )
    .unwrap();
    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);
    session.configure(buffer, 4, 4).unwrap();
    assert_eq!(session.context_tier(), Some(ApiTier::Gles2));
}

#[test]
fn share_context_must_exist() {
    common::init();
    let mut session = OffscreenSession::with_share_context(
        SoftwareDriver::new(),
        SessionConfig::default(),
        gpu_interop::ContextId(77),
    )
    .unwrap();
    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);
    assert!(matches!(
        session.configure(buffer, 4, 4),
        Err(OffscreenError::ContextCreation(_))
    ));
}

#[test]
fn oversized_buffer_is_rejected_without_panicking() {
    for width in [0x4000_0000, 0x8000_0000] {
        let mut session = session();
        let desc = BufferDesc {
            width,
            height: 1,
            format: PixelFormat::Rgba8888,
            usage: BufferUsage::REQUIRED,
            stride: 0,
        };
        let (buffer, _) = SharedBuffer::host(desc);
        assert!(matches!(
            session.configure(buffer, width, 1),
            Err(OffscreenError::UnsupportedBuffer(_))
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.resource_counts().is_empty());
    }
}
