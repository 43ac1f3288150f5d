//! Render a few frames into a shared buffer, wait on each frame's fence from
//! the consumer side and read the result back.
//!
//! `--driver software` works anywhere and checks the pixels that landed in
//! the shared memory. `--driver egl` probes the platform EGL stack: it brings
//! up a context and reports what it got, since importing a real DMA-BUF needs
//! an allocator this demo does not carry.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use gpu_interop::SoftwareDriver;
use offscreen_core::{
    BlendMode, BufferDesc, BufferUsage, FrameCompletion, LoggingConfig, PixelFormat,
    SessionConfig, SharedBuffer,
};
use offscreen_gpu::{OffscreenService, OffscreenSession};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverKind {
    Software,
    Egl,
}

#[derive(Parser)]
#[command(name = "fence-readback")]
#[command(version, about = "Offscreen render, fence wait and readback", long_about = None)]
struct Args {
    #[arg(long, value_enum, default_value = "software")]
    driver: DriverKind,

    /// Frames to render
    #[arg(short, long, default_value = "3")]
    frames: u32,

    #[arg(long, default_value = "64")]
    width: u32,

    #[arg(long, default_value = "64")]
    height: u32,

    /// Background as r,g,b,a in 0..1
    #[arg(long, value_delimiter = ',', num_args = 4, default_values_t = vec![0.0, 0.0, 0.0, 1.0])]
    clear: Vec<f32>,

    /// Add the gradient onto the background instead of replacing it
    #[arg(long)]
    additive: bool,

    /// Fence wait timeout in milliseconds
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Log filter, RUST_LOG syntax
    #[arg(long)]
    log: Option<String>,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let clear: [f32; 4] = self
            .clear
            .as_slice()
            .try_into()
            .context("--clear takes exactly four components")?;
        let blend = if self.additive {
            BlendMode::Additive
        } else {
            BlendMode::Replace
        };
        Ok(SessionConfig::default()
            .with_clear_color(clear)
            .with_blend(blend))
    }
}

// ---------------------------------------------------------------------------
// Software
// ---------------------------------------------------------------------------

fn run_software(args: &Args) -> Result<()> {
    let config = args.session_config()?;
    let mut session = OffscreenSession::new(SoftwareDriver::new(), config)?;

    let desc = BufferDesc::new(
        args.width,
        args.height,
        PixelFormat::Rgba8888,
        BufferUsage::REQUIRED | BufferUsage::CPU_READ,
    );
    let (buffer, memory) = SharedBuffer::host(desc);
    session.configure(buffer, args.width, args.height)?;
    info!("configured {}x{} host buffer", args.width, args.height);

    let timeout = Duration::from_millis(args.timeout_ms);
    for _ in 0..args.frames {
        let Some(completion) = session.render()? else {
            bail!("session is not configured");
        };
        match completion {
            FrameCompletion::Fenced(fence) => {
                let started = Instant::now();
                if !fence.wait(Some(timeout))? {
                    bail!("frame {} did not signal within {timeout:?}", fence.frame());
                }
                println!("frame {} signaled after {:?}", fence.frame(), started.elapsed());
            }
            FrameCompletion::Unconfirmed { frame, error } => {
                warn!("frame {frame} has no fence: {error}");
            }
        }
    }

    let corners = [
        (0, 0),
        (args.width - 1, 0),
        (0, args.height - 1),
        (args.width - 1, args.height - 1),
    ];
    for (x, y) in corners {
        if let Some(pixel) = memory.pixel(desc.stride, x, y) {
            println!("pixel ({x}, {y}) = {pixel:?}");
        }
    }

    let readback = session
        .read_pixels(0, 0, args.width, args.height)?
        .context("session lost its configuration")?;
    if readback != memory.snapshot() {
        bail!("readback differs from shared memory");
    }
    println!("readback matches shared memory ({} bytes)", readback.len());

    session.teardown()?;
    let counts = session.resource_counts();
    println!("after teardown: {} driver objects alive", counts.total());
    Ok(())
}

// ---------------------------------------------------------------------------
// EGL probe
// ---------------------------------------------------------------------------

#[cfg(any(target_os = "linux", target_os = "android"))]
fn run_egl(args: &Args) -> Result<()> {
    use gpu_interop::EglDriver;
    use offscreen_core::ContextScope;

    let driver = EglDriver::new()?;
    let (major, minor) = driver.device().version();
    println!("EGL {major}.{minor}");
    for extension in [
        "EGL_ANDROID_native_fence_sync",
        "EGL_EXT_image_dma_buf_import",
        "EGL_EXT_image_dma_buf_import_modifiers",
        "EGL_ANDROID_get_native_client_buffer",
        "EGL_EXT_create_context_robustness",
    ] {
        println!("  {extension}: {}", driver.device().has_extension(extension));
    }

    let config = args
        .session_config()?
        .with_context_scope(ContextScope::Service);
    let mut session = OffscreenSession::new(driver, config)?;
    println!(
        "context {:?} at {:?}",
        session.context_id(),
        session.context_tier()
    );
    session.teardown()?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn run_egl(_args: &Args) -> Result<()> {
    bail!("the EGL driver is only built for Linux and Android")
}

fn main() -> Result<()> {
    let args = Args::parse();
    offscreen_core::init_logging(LoggingConfig {
        env_filter: args.log.clone(),
        ansi: true,
    });

    match args.driver {
        DriverKind::Software => run_software(&args),
        DriverKind::Egl => run_egl(&args),
    }
}
