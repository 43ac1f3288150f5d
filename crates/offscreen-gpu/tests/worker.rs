mod common;

use std::thread;
use std::time::Duration;

use common::host_buffer;
use gpu_interop::{FaultInjector, SoftwareDriver};
use offscreen_core::{OffscreenError, PixelFormat, SessionConfig, SessionState};
use offscreen_gpu::{OffscreenService, SessionWorker};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn spawn(faults: &FaultInjector) -> SessionWorker {
    common::init();
    let faults = faults.clone();
    SessionWorker::spawn("gpu-worker-test", SessionConfig::default(), move || {
        Ok(SoftwareDriver::new().with_faults(faults.clone()))
    })
    .unwrap()
}

#[test]
fn test_lifecycle_from_caller_thread() {
    let mut worker = spawn(&FaultInjector::new());
    let (buffer, memory) = host_buffer(32, 32, PixelFormat::Rgba8888);
    worker.configure(buffer, 32, 32).unwrap();

    for expected in 1..=3 {
        let fence = worker.render().unwrap().unwrap().into_fence().unwrap();
        assert_eq!(fence.frame(), expected);
        assert!(fence.wait(WAIT).unwrap());
    }
    assert_eq!(memory.pixel(32 * 4, 0, 0), Some([4, 4, 0, 255]));

    let status = worker.status().unwrap();
    assert_eq!(status.state, SessionState::Configured);
    assert_eq!(status.frames_rendered, 3);
    assert_eq!(status.resources.syncs, 0);

    worker.teardown().unwrap();
    let status = worker.status().unwrap();
    assert_eq!(status.state, SessionState::Destroyed);
    assert!(status.resources.is_empty());
}

#[test]
fn test_fence_waited_on_consumer_thread() {
    let mut worker = spawn(&FaultInjector::new());
    let (buffer, memory) = host_buffer(8, 8, PixelFormat::Rgba8888);
    worker.configure(buffer, 8, 8).unwrap();
    let fence = worker.render().unwrap().unwrap().into_fence().unwrap();

    let consumer = thread::spawn(move || {
        assert!(fence.wait(WAIT).unwrap());
        memory.pixel(8 * 4, 7, 7)
    });
    assert_eq!(consumer.join().unwrap(), Some([239, 239, 0, 255]));
}

#[test]
fn test_clear_color_and_readback() {
    let mut worker = spawn(&FaultInjector::new());
    let (buffer, _memory) = host_buffer(4, 4, PixelFormat::Rgba8888);
    worker.configure(buffer, 4, 4).unwrap();
    assert!(worker.read_pixels(0, 0, 4, 4).unwrap().is_some());

    worker.set_clear_color([1.0, 0.0, 0.0, 1.0]).unwrap();
    let _ = worker.render().unwrap().unwrap();
    let pixels = worker.read_pixels(0, 0, 1, 1).unwrap().unwrap();
    // Replace blending: the quad covers the background.
    assert_eq!(pixels, vec![32, 32, 0, 255]);
}

#[test]
fn test_reset_recovers_from_device_loss() {
    let faults = FaultInjector::new();
    let mut worker = spawn(&faults);
    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);
    worker.configure(buffer, 4, 4).unwrap();
    let _ = worker.render().unwrap().unwrap();

    faults.lose_device();
    assert_eq!(worker.render().unwrap_err(), OffscreenError::DeviceLost);
    assert!(worker.status().unwrap().device_lost);

    faults.restore_device();
    worker.reset().unwrap();
    let status = worker.status().unwrap();
    assert_eq!(status.state, SessionState::Uninitialized);
    assert!(!status.device_lost);
    assert!(status.resources.is_empty());

    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);
    worker.configure(buffer, 4, 4).unwrap();
    let completion = worker.render().unwrap().unwrap();
    assert_eq!(completion.frame(), 1);
    assert!(completion.is_confirmed());
}

#[test]
fn test_failed_reset_stops_worker() {
    common::init();
    let mut attempts = 0;
    let mut worker = SessionWorker::spawn("gpu-worker-test", SessionConfig::default(), move || {
        attempts += 1;
        if attempts == 1 {
            Ok(SoftwareDriver::new())
        } else {
            Err(gpu_interop::DriverError::call("eglInitialize", "EGL_NOT_INITIALIZED"))
        }
    })
    .unwrap();

    assert!(matches!(
        worker.reset(),
        Err(OffscreenError::ContextCreation(_))
    ));
    assert_eq!(worker.render().unwrap_err(), OffscreenError::WorkerStopped);
    assert_eq!(worker.status().unwrap_err(), OffscreenError::WorkerStopped);
    // Nothing left to release; repeated teardown stays a no-op.
    worker.teardown().unwrap();
    worker.teardown().unwrap();
}

#[test]
fn test_errors_cross_the_thread_boundary() {
    let mut worker = spawn(&FaultInjector::new());
    let (buffer, _) = host_buffer(4, 4, PixelFormat::Rgba8888);
    assert!(matches!(
        worker.configure(buffer, 8, 8),
        Err(OffscreenError::DimensionMismatch { .. })
    ));
    worker.teardown().unwrap();
    assert_eq!(worker.status().unwrap().state, SessionState::Uninitialized);
}
