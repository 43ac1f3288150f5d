//! CPU rasterisation of the two commands the offscreen core records: a clear
//! and the full-target texture coordinate quad.
//!
//! Memory row 0 is GL row 0 (the bottom row), matching how an imported
//! image backs a texture.

use offscreen_core::{BlendMode, BufferDesc, PixelFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Float channel to UNORM8, the conversion GL applies on framebuffer writes.
pub(crate) fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn store(format: PixelFormat, px: &mut [u8], rgba: [f32; 4]) {
    let [r, g, b, a] = rgba.map(unorm8);
    let bytes = match format {
        PixelFormat::Rgba8888 => [r, g, b, a],
        PixelFormat::Rgbx8888 => [r, g, b, 0xff],
        PixelFormat::Bgra8888 => [b, g, r, a],
    };
    px.copy_from_slice(&bytes);
}

fn load(format: PixelFormat, px: &[u8]) -> [f32; 4] {
    let rgba = match format {
        PixelFormat::Rgba8888 => [px[0], px[1], px[2], px[3]],
        PixelFormat::Rgbx8888 => [px[0], px[1], px[2], 0xff],
        PixelFormat::Bgra8888 => [px[2], px[1], px[0], px[3]],
    };
    rgba.map(|c| c as f32 / 255.0)
}

fn offset(desc: &BufferDesc, x: u32, y: u32) -> usize {
    y as usize * desc.stride as usize + x as usize * desc.format.bytes_per_pixel() as usize
}

/// Clamp the half-open span `[start, start + len)` to `[0, limit)`.
fn clip(start: i32, len: u32, limit: u32) -> (u32, u32) {
    let lo = i64::from(start).clamp(0, i64::from(limit));
    let hi = (i64::from(start) + i64::from(len)).clamp(0, i64::from(limit));
    (lo as u32, hi as u32)
}

/// `glClear` ignores the viewport, so the whole image is written.
pub(crate) fn clear(memory: &mut [u8], desc: &BufferDesc, rgba: [f32; 4]) {
    for y in 0..desc.height {
        for x in 0..desc.width {
            let at = offset(desc, x, y);
            store(desc.format, &mut memory[at..at + 4], rgba);
        }
    }
}

/// Shade every pixel centre of `viewport` with `(u, v, 0, 1)`.
pub(crate) fn draw_texcoord_quad(
    memory: &mut [u8],
    desc: &BufferDesc,
    viewport: Viewport,
    blend: BlendMode,
) {
    if viewport.width == 0 || viewport.height == 0 {
        return;
    }
    let (x0, x1) = clip(viewport.x, viewport.width, desc.width);
    let (y0, y1) = clip(viewport.y, viewport.height, desc.height);

    for y in y0..y1 {
        let v = ((i64::from(y) - i64::from(viewport.y)) as f32 + 0.5) / viewport.height as f32;
        for x in x0..x1 {
            let u = ((i64::from(x) - i64::from(viewport.x)) as f32 + 0.5) / viewport.width as f32;
            let src = [u, v, 0.0, 1.0];
            let at = offset(desc, x, y);
            let px = &mut memory[at..at + 4];
            let out = match blend {
                BlendMode::Replace => src,
                BlendMode::Additive => {
                    let dst = load(desc.format, px);
                    [dst[0] + src[0], dst[1] + src[1], dst[2] + src[2], dst[3] + src[3]]
                }
            };
            store(desc.format, px, out);
        }
    }
}

/// Whether the rectangle lies inside the image.
pub(crate) fn contains(desc: &BufferDesc, x: i32, y: i32, width: u32, height: u32) -> bool {
    let fits = |start: i32, len: u32, limit: u32| {
        start >= 0 && i64::from(start) + i64::from(len) <= i64::from(limit)
    };
    fits(x, width, desc.width) && fits(y, height, desc.height)
}

/// `glReadPixels` with `GL_RGBA`/`GL_UNSIGNED_BYTE`. Pixels outside the
/// image read as zero.
pub(crate) fn read_rgba(
    memory: &[u8],
    desc: &BufferDesc,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let mut out = vec![0u8; width as usize * height as usize * 4];
    for row in 0..height {
        for col in 0..width {
            let (sx, sy) = (i64::from(x) + i64::from(col), i64::from(y) + i64::from(row));
            if sx < 0 || sy < 0 || sx >= i64::from(desc.width) || sy >= i64::from(desc.height) {
                continue;
            }
            let at = offset(desc, sx as u32, sy as u32);
            let rgba = load(desc.format, &memory[at..at + 4]).map(unorm8);
            let dst = (row as usize * width as usize + col as usize) * 4;
            out[dst..dst + 4].copy_from_slice(&rgba);
        }
    }
    out
}
