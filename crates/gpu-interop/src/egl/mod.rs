//! EGL + GL ES driver (Linux via DMA-BUF, Android via AHardwareBuffer).

pub mod device;
pub mod interop;

pub use device::{EglDevice, ExtensionProcs};
pub use interop::EglDriver;
