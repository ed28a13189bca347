//! Frame pixel storage
//!
//! A [`PixelBuffer`] owns one frame: either a plain heap block or a
//! memfd-backed shared memory segment that the display server writes into.

use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use memmap2::MmapMut;

pub fn create_memfd(len: usize) -> io::Result<OwnedFd> {
    // TODO: BSD support using shm_open
    let name = c"snapreel-frame";
    let fd = rustix::fs::memfd_create(name, rustix::fs::MemfdFlags::CLOEXEC)?;
    rustix::fs::ftruncate(&fd, len as u64)?;
    Ok(fd)
}

/// A mapped memfd segment.
pub struct SharedMemory {
    map: MmapMut,
    fd: OwnedFd,
}

impl SharedMemory {
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared memory segment must not be empty",
            ));
        }
        let fd = create_memfd(len)?;
        let map = unsafe { MmapMut::map_mut(&fd)? };
        Ok(Self { map, fd })
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Duplicate the descriptor, e.g. to hand it to another process.
    pub fn try_clone_fd(&self) -> io::Result<OwnedFd> {
        self.fd.try_clone()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Server-side registration of a [`SharedMemory`] segment.
///
/// Implementors detach in `Drop`; the buffer drops the attachment before
/// unmapping the memory it refers to.
pub trait SegmentAttachment: Send {
    fn segment_id(&self) -> u32;
}

enum Storage {
    Heap(Vec<u8>),
    // Field order is drop order: detach, then unmap.
    Shared {
        attachment: Box<dyn SegmentAttachment>,
        memory: SharedMemory,
    },
}

/// Byte order of multi-byte pixels in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LsbFirst,
    MsbFirst,
}

/// One frame's pixels plus the geometry needed to address them.
pub struct PixelBuffer {
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    stride: usize,
    byte_order: ByteOrder,
    storage: Storage,
}

impl PixelBuffer {
    /// Allocate a zero-filled heap buffer.
    pub fn zeroed(
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        stride: usize,
        byte_order: ByteOrder,
    ) -> Self {
        let buffer = Self {
            width,
            height,
            bits_per_pixel,
            stride,
            byte_order,
            storage: Storage::Heap(vec![0; stride * height as usize]),
        };
        buffer.debug_check();
        buffer
    }

    /// Wrap a shared segment that already holds (or will hold) the frame.
    ///
    /// Returns `None` when the segment is too small for `stride * height`.
    pub fn shared(
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        stride: usize,
        byte_order: ByteOrder,
        memory: SharedMemory,
        attachment: Box<dyn SegmentAttachment>,
    ) -> Option<Self> {
        if memory.len() < stride * height as usize {
            return None;
        }
        let buffer = Self {
            width,
            height,
            bits_per_pixel,
            stride,
            byte_order,
            storage: Storage::Shared { attachment, memory },
        };
        buffer.debug_check();
        Some(buffer)
    }

    fn debug_check(&self) {
        debug_assert!(matches!(self.bits_per_pixel, 8 | 16 | 24 | 32));
        debug_assert!(self.stride >= self.width as usize * self.bytes_per_pixel());
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize).div_ceil(8)
    }

    /// Bytes from the start of one row to the start of the next.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Server-side segment id when the storage is shared.
    pub fn segment_id(&self) -> Option<u32> {
        match &self.storage {
            Storage::Heap(_) => None,
            Storage::Shared { attachment, .. } => Some(attachment.segment_id()),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.storage, Storage::Shared { .. })
    }

    /// The frame bytes, `stride * height` long.
    pub fn data(&self) -> &[u8] {
        let len = self.stride * self.height as usize;
        match &self.storage {
            Storage::Heap(data) => &data[..len],
            Storage::Shared { memory, .. } => &memory.map[..len],
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.stride * self.height as usize;
        match &mut self.storage {
            Storage::Heap(data) => &mut data[..len],
            Storage::Shared { memory, .. } => &mut memory.map[..len],
        }
    }

    /// Overwrite the frame in place. Fails if `src` has the wrong length.
    pub fn copy_from(&mut self, src: &[u8]) -> bool {
        let dst = self.data_mut();
        if dst.len() != src.len() {
            return false;
        }
        dst.copy_from_slice(src);
        true
    }

    /// The visible bytes of row `y` (stride padding excluded).
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        let len = self.width as usize * self.bytes_per_pixel();
        self.data().get(start..start + len)
    }

    pub fn row_mut(&mut self, y: u32) -> Option<&mut [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        let len = self.width as usize * self.bytes_per_pixel();
        self.data_mut().get_mut(start..start + len)
    }

    /// Read the packed pixel at `(x, y)`, normalised to host order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width {
            return None;
        }
        let bpp = self.bytes_per_pixel();
        let order = self.byte_order;
        let row = self.row(y)?;
        let start = x as usize * bpp;
        Some(decode_pixel(&row[start..start + bpp], order))
    }

    /// Store a host-order pixel at `(x, y)` in the buffer's byte order.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: u32) -> bool {
        if x >= self.width {
            return false;
        }
        let bpp = self.bytes_per_pixel();
        let order = self.byte_order;
        let Some(row) = self.row_mut(y) else {
            return false;
        };
        let start = x as usize * bpp;
        encode_pixel(&mut row[start..start + bpp], order, value);
        true
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bits_per_pixel", &self.bits_per_pixel)
            .field("stride", &self.stride)
            .field("byte_order", &self.byte_order)
            .field("shared", &self.is_shared())
            .finish()
    }
}

fn decode_pixel(bytes: &[u8], order: ByteOrder) -> u32 {
    match order {
        ByteOrder::LsbFirst => bytes
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
        ByteOrder::MsbFirst => bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
    }
}

fn encode_pixel(bytes: &mut [u8], order: ByteOrder, value: u32) {
    let n = bytes.len();
    for (i, b) in bytes.iter_mut().enumerate() {
        let shift = match order {
            ByteOrder::LsbFirst => 8 * i,
            ByteOrder::MsbFirst => 8 * (n - 1 - i),
        };
        *b = (value >> shift) as u8;
    }
}
