//! Externally allocated, cross-process shareable pixel buffers.
//!
//! A [`SharedBuffer`] is only ever *referenced* by a session: the memory is
//! allocated and finally freed by whoever handed it over. The session keeps
//! the reference for as long as it stays configured and drops it on teardown.

use std::ffi::c_void;
use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// Memory layout of one pixel, named in byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// R, G, B, A bytes.
    Rgba8888,
    /// R, G, B bytes followed by an ignored byte.
    Rgbx8888,
    /// B, G, R, A bytes.
    Bgra8888,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        4
    }

    pub const fn has_alpha(self) -> bool {
        !matches!(self, PixelFormat::Rgbx8888)
    }

    /// DRM fourcc for DMA-BUF import. DRM names formats by little-endian
    /// word order, so byte-order RGBA is `AB24`.
    pub const fn drm_fourcc(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 => fourcc(b"AB24"),
            PixelFormat::Rgbx8888 => fourcc(b"XB24"),
            PixelFormat::Bgra8888 => fourcc(b"AR24"),
        }
    }

    /// `AHARDWAREBUFFER_FORMAT_*` code.
    pub const fn hardware_buffer_format(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 => 1,
            PixelFormat::Rgbx8888 => 2,
            PixelFormat::Bgra8888 => 5,
        }
    }

    pub fn from_hardware_buffer_format(code: u32) -> Option<Self> {
        match code {
            1 => Some(PixelFormat::Rgba8888),
            2 => Some(PixelFormat::Rgbx8888),
            5 => Some(PixelFormat::Bgra8888),
            _ => None,
        }
    }
}

bitflags! {
    /// Buffer usage bits. Values match `AHARDWAREBUFFER_USAGE_*` so a
    /// hardware buffer description can be converted with
    /// [`BufferUsage::from_bits_truncate`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u64 {
        const CPU_READ = 0x3;
        const CPU_WRITE = 0x30;
        const GPU_SAMPLED_IMAGE = 1 << 8;
        const GPU_COLOR_OUTPUT = 1 << 9;

        /// What a buffer must allow before it can back a render target.
        const REQUIRED = Self::GPU_SAMPLED_IMAGE.bits() | Self::GPU_COLOR_OUTPUT.bits();
    }
}

/// Size, format and usage of a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
    /// Row pitch in bytes.
    pub stride: u32,
}

impl BufferDesc {
    /// Describe a tightly packed buffer. A row too wide for `u32` saturates
    /// the stride; [`layout_len`](Self::layout_len) rejects such a buffer.
    pub fn new(width: u32, height: u32, format: PixelFormat, usage: BufferUsage) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            stride: width.saturating_mul(format.bytes_per_pixel()),
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Usage bits from [`BufferUsage::REQUIRED`] this buffer does not grant.
    pub fn missing_usage(&self) -> BufferUsage {
        BufferUsage::REQUIRED.difference(self.usage)
    }

    pub fn byte_len(&self) -> usize {
        (self.stride as usize).saturating_mul(self.height as usize)
    }

    /// Bytes the described image occupies, after checking that every size
    /// fits the signed 32-bit attributes GL and EGL take and that a row fits
    /// in the stride.
    pub fn layout_len(&self) -> Result<usize, LayoutError> {
        let limit = i32::MAX as u32;
        if self.width > limit || self.height > limit || self.stride > limit {
            return Err(LayoutError::TooLarge {
                width: self.width,
                height: self.height,
                stride: self.stride,
            });
        }
        let row = self
            .width
            .checked_mul(self.format.bytes_per_pixel())
            .ok_or(LayoutError::Overflow)?;
        if self.stride < row {
            return Err(LayoutError::StrideTooSmall {
                stride: self.stride,
                row,
            });
        }
        (self.stride as usize)
            .checked_mul(self.height as usize)
            .ok_or(LayoutError::Overflow)
    }
}

/// Why a [`BufferDesc`] cannot describe a real image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("{width}x{height} with stride {stride} exceeds the 32-bit size limit")]
    TooLarge { width: u32, height: u32, stride: u32 },

    #[error("stride {stride} is shorter than a {row}-byte row")]
    StrideTooSmall { stride: u32, row: u32 },

    #[error("buffer size overflows")]
    Overflow,
}

/// Non-owning pointer to an Android `AHardwareBuffer`.
///
/// The session never acquires or releases the buffer; the caller keeps it
/// alive until the session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareBufferRef(NonNull<c_void>);

impl HardwareBufferRef {
    /// # Safety
    ///
    /// `ptr` must point to a live `AHardwareBuffer` that outlives every
    /// session configured with it.
    pub unsafe fn from_raw(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

// SAFETY: AHardwareBuffer is a reference-counted, thread-safe NDK object and
// this wrapper never dereferences the pointer itself.
unsafe impl Send for HardwareBufferRef {}

/// A block of host memory shared between a producer and a consumer in the
/// same address space. Used by the software driver in place of GPU memory.
#[derive(Clone)]
pub struct HostBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl HostBuffer {
    /// Allocate zeroed storage sized for `desc`.
    pub fn new(desc: &BufferDesc) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0; desc.byte_len()])),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Read one 4-byte pixel, row 0 being the first row in memory.
    pub fn pixel(&self, stride: u32, x: u32, y: u32) -> Option<[u8; 4]> {
        let bytes = self.bytes.lock();
        let offset = y as usize * stride as usize + x as usize * 4;
        bytes.get(offset..offset + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Whether two handles refer to the same memory block.
    pub fn same_memory(&self, other: &HostBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("len", &self.len()).finish()
    }
}

/// Where the memory of a [`SharedBuffer`] comes from.
#[derive(Debug)]
pub enum BufferSource {
    /// Single-plane Linux DMA-BUF. The fd is the duplicate handed over by the
    /// transport; closing it does not free the memory.
    DmaBuf {
        fd: OwnedFd,
        offset: u32,
        modifier: Option<u64>,
    },
    /// Android hardware buffer.
    HardwareBuffer(HardwareBufferRef),
    /// Host memory, software driver only.
    Host(HostBuffer),
}

impl BufferSource {
    pub fn kind(&self) -> &'static str {
        match self {
            BufferSource::DmaBuf { .. } => "dma-buf",
            BufferSource::HardwareBuffer(_) => "hardware-buffer",
            BufferSource::Host(_) => "host",
        }
    }

    pub fn dma_buf_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            BufferSource::DmaBuf { fd, .. } => Some(fd.as_fd()),
            _ => None,
        }
    }
}

/// An externally allocated buffer plus its description.
#[derive(Debug)]
pub struct SharedBuffer {
    pub desc: BufferDesc,
    pub source: BufferSource,
}

impl SharedBuffer {
    pub fn new(desc: BufferDesc, source: BufferSource) -> Self {
        Self { desc, source }
    }

    pub fn dma_buf(desc: BufferDesc, fd: OwnedFd, offset: u32, modifier: Option<u64>) -> Self {
        Self::new(desc, BufferSource::DmaBuf { fd, offset, modifier })
    }

    pub fn hardware_buffer(desc: BufferDesc, buffer: HardwareBufferRef) -> Self {
        Self::new(desc, BufferSource::HardwareBuffer(buffer))
    }

    /// Allocate host memory for `desc` and return the buffer together with a
    /// consumer-side handle onto the same memory.
    pub fn host(desc: BufferDesc) -> (Self, HostBuffer) {
        let memory = HostBuffer::new(&desc);
        (Self::new(desc, BufferSource::Host(memory.clone())), memory)
    }
}
