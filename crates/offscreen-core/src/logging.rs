//! Process-wide `tracing` subscriber setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Logger configuration.
///
/// `env_filter` uses `EnvFilter` directives (e.g. "info",
/// "offscreen_gpu=debug,gpu_interop=trace"). When unset, `RUST_LOG` is read,
/// then `info` is used.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            ansi: true,
        }
    }
}

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are ignored, as is a
/// subscriber that someone else installed first.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = match config.env_filter {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(config.ansi)
            .with_thread_names(true)
            .try_init()
            .is_ok();

        if installed {
            tracing::debug!("logging initialized");
        }
    });
}
