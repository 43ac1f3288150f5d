#![allow(dead_code)]

use offscreen_core::{BufferDesc, BufferUsage, HostBuffer, PixelFormat, SharedBuffer};

pub fn init() {
    offscreen_core::init_logging(offscreen_core::LoggingConfig {
        env_filter: Some("warn".into()),
        ansi: false,
    });
}

pub fn host_buffer(width: u32, height: u32, format: PixelFormat) -> (SharedBuffer, HostBuffer) {
    SharedBuffer::host(BufferDesc::new(width, height, format, BufferUsage::REQUIRED))
}

/// GL's float to UNORM8 conversion.
pub fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Texture coordinate of pixel centre `i` on an axis of `len` pixels.
pub fn texcoord(i: u32, len: u32) -> f32 {
    (i as f32 + 0.5) / len as f32
}

/// Expected RGBA at `(x, y)` after clearing to `clear` and adding the
/// texture coordinate quad on top.
pub fn additive_pixel(clear: [f32; 4], x: u32, y: u32, width: u32, height: u32) -> [u8; 4] {
    let background = clear.map(unorm8).map(|c| c as f32 / 255.0);
    [
        unorm8(background[0] + texcoord(x, width)),
        unorm8(background[1] + texcoord(y, height)),
        unorm8(background[2]),
        unorm8(background[3] + 1.0),
    ]
}
