//! A dedicated GPU thread that owns one [`OffscreenSession`].
//!
//! GL contexts are bound to the thread that made them current, so every
//! request is shipped to that thread over a command queue and answered on a
//! one-shot reply channel.

use std::thread;

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::{debug, error, info};

use gpu_interop::{DriverError, GpuDriver, ResourceCounts};
use offscreen_core::{FrameCompletion, OffscreenError, SessionConfig, SessionState, SharedBuffer};

use crate::context::from_driver;
use crate::service::OffscreenService;
use crate::session::OffscreenSession;

/// Snapshot of the session owned by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub frames_rendered: u64,
    pub device_lost: bool,
    pub resources: ResourceCounts,
}

type Reply<T> = Sender<Result<T, OffscreenError>>;

enum Command {
    Configure {
        buffer: SharedBuffer,
        width: u32,
        height: u32,
        reply: Reply<()>,
    },
    Render {
        reply: Reply<Option<FrameCompletion>>,
    },
    Teardown {
        reply: Reply<()>,
    },
    SetClearColor {
        rgba: [f32; 4],
    },
    ReadPixels {
        rect: (i32, i32, u32, u32),
        reply: Reply<Option<Vec<u8>>>,
    },
    Reset {
        reply: Reply<()>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    Shutdown,
}

/// Owns a named thread running one session.
///
/// The driver is built on that thread by `factory`, so drivers that are not
/// `Send` work too. [`reset`](SessionWorker::reset) builds a fresh driver
/// and session, the way back after device loss.
pub struct SessionWorker {
    commands: Sender<Command>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SessionWorker {
    /// Start the thread and build the first session on it. Construction
    /// errors (driver or, with service scope, context creation) are
    /// returned here.
    pub fn spawn<D, F>(name: &str, config: SessionConfig, factory: F) -> Result<Self, OffscreenError>
    where
        D: GpuDriver + 'static,
        F: FnMut() -> Result<D, DriverError> + Send + 'static,
    {
        let (commands, queue) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded::<Result<(), OffscreenError>>(1);
        let thread_name = name.to_owned();

        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut factory = factory;
                let mut session = match open_session(&mut factory, &config) {
                    Ok(session) => {
                        let _ = ready_tx.send(Ok(()));
                        session
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                info!("session worker {thread_name} started");

                for command in queue.iter() {
                    match command {
                        Command::Configure {
                            buffer,
                            width,
                            height,
                            reply,
                        } => {
                            let _ = reply.send(session.configure(buffer, width, height));
                        }
                        Command::Render { reply } => {
                            let _ = reply.send(session.render());
                        }
                        Command::Teardown { reply } => {
                            session.destroy();
                            let _ = reply.send(Ok(()));
                        }
                        Command::SetClearColor { rgba } => session.set_clear_color(rgba),
                        Command::ReadPixels {
                            rect: (x, y, width, height),
                            reply,
                        } => {
                            let _ = reply.send(session.read_pixels(x, y, width, height));
                        }
                        Command::Reset { reply } => {
                            // The old session releases its context before the
                            // new driver comes up.
                            drop(session);
                            match open_session(&mut factory, &config) {
                                Ok(fresh) => {
                                    session = fresh;
                                    let _ = reply.send(Ok(()));
                                }
                                Err(e) => {
                                    error!("session worker {thread_name} could not reset: {e}");
                                    let _ = reply.send(Err(e));
                                    return;
                                }
                            }
                        }
                        Command::Status { reply } => {
                            let _ = reply.send(Ok(SessionStatus {
                                state: session.state(),
                                frames_rendered: session.frames_rendered(),
                                device_lost: session.is_device_lost(),
                                resources: session.resource_counts(),
                            }));
                        }
                        Command::Shutdown => break,
                    }
                }
                debug!("session worker {thread_name} stopping");
            })
            .map_err(|e| OffscreenError::Driver(format!("spawn {name}: {e}")))?;

        let worker = Self {
            commands,
            thread: Some(thread),
        };
        ready_rx
            .recv()
            .map_err(|_| OffscreenError::WorkerStopped)??;
        Ok(worker)
    }

    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, OffscreenError> {
        let (reply, response) = bounded(1);
        self.commands
            .send(command(reply))
            .map_err(|_| OffscreenError::WorkerStopped)?;
        response.recv().map_err(|_| OffscreenError::WorkerStopped)?
    }

    pub fn set_clear_color(&self, rgba: [f32; 4]) -> Result<(), OffscreenError> {
        self.commands
            .send(Command::SetClearColor { rgba })
            .map_err(|_| OffscreenError::WorkerStopped)
    }

    pub fn read_pixels(
        &self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<u8>>, OffscreenError> {
        self.request(|reply| Command::ReadPixels {
            rect: (x, y, width, height),
            reply,
        })
    }

    /// Replace the session with a fresh `Uninitialized` one on a new driver.
    pub fn reset(&self) -> Result<(), OffscreenError> {
        self.request(|reply| Command::Reset { reply })
    }

    pub fn status(&self) -> Result<SessionStatus, OffscreenError> {
        self.request(|reply| Command::Status { reply })
    }
}

fn open_session<D, F>(
    factory: &mut F,
    config: &SessionConfig,
) -> Result<OffscreenSession<D>, OffscreenError>
where
    D: GpuDriver,
    F: FnMut() -> Result<D, DriverError>,
{
    let driver = factory().map_err(|e| match e {
        DriverError::ContextLost | DriverError::NotCurrent => from_driver(e),
        other => OffscreenError::ContextCreation(other.to_string()),
    })?;
    OffscreenSession::new(driver, config.clone())
}

impl OffscreenService for SessionWorker {
    fn configure(
        &mut self,
        buffer: SharedBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), OffscreenError> {
        self.request(|reply| Command::Configure {
            buffer,
            width,
            height,
            reply,
        })
    }

    fn render(&mut self) -> Result<Option<FrameCompletion>, OffscreenError> {
        self.request(|reply| Command::Render { reply })
    }

    /// A stopped worker has already dropped its session, so there is
    /// nothing left to tear down.
    fn teardown(&mut self) -> Result<(), OffscreenError> {
        match self.request(|reply| Command::Teardown { reply }) {
            Err(OffscreenError::WorkerStopped) => Ok(()),
            result => result,
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("session worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_interop::SoftwareDriver;
    use offscreen_core::{ApiTier, ContextScope};

    #[test]
    fn test_construction_error_is_returned() {
        let config = SessionConfig::default().with_context_scope(ContextScope::Service);
        let result = SessionWorker::spawn("gpu-test", config, || {
            Ok(SoftwareDriver::with_tiers(&[]))
        });
        assert!(matches!(result, Err(OffscreenError::ContextCreation(_))));
    }

    #[test]
    fn test_factory_error_is_context_creation() {
        let result = SessionWorker::spawn("gpu-test", SessionConfig::default(), || {
            Err::<SoftwareDriver, _>(DriverError::call("eglInitialize", "EGL_NOT_INITIALIZED"))
        });
        assert!(matches!(result, Err(OffscreenError::ContextCreation(_))));
    }

    #[test]
    fn test_render_before_configure_is_absent() {
        let mut worker = SessionWorker::spawn("gpu-test", SessionConfig::default(), || {
            Ok(SoftwareDriver::with_tiers(&[ApiTier::Gles2]))
        })
        .unwrap();
        assert!(worker.render().unwrap().is_none());
        let status = worker.status().unwrap();
        assert_eq!(status.state, SessionState::Uninitialized);
        assert!(status.resources.is_empty());
        worker.teardown().unwrap();
    }
}
