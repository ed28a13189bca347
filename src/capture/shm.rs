//! MIT-SHM capture
//!
//! The frame lives in a memfd segment attached to the server with
//! `ShmAttachFd`; each `ShmGetImage` has the server write the pixels
//! straight into it, so no image data crosses the socket.

use std::sync::Arc;

use x11rb::connection::Connection;
use x11rb::protocol::shm::ConnectionExt as _;
use x11rb::protocol::xproto::ImageFormat;

use super::{FrameGeometry, FrameSource, Rect, X11Display};
use crate::buffer::{PixelBuffer, SegmentAttachment, SharedMemory};
use crate::color::Palette;
use crate::error::{CaptureError, Result};

/// Lowest MIT-SHM version with fd passing.
const MIN_VERSION: (u16, u16) = (1, 2);

struct XShmAttachment {
    display: Arc<X11Display>,
    seg: u32,
}

impl SegmentAttachment for XShmAttachment {
    fn segment_id(&self) -> u32 {
        self.seg
    }
}

impl Drop for XShmAttachment {
    fn drop(&mut self) {
        let conn = self.display.conn();
        if let Err(e) = conn.shm_detach(self.seg) {
            log::warn!("ShmDetach({:#x}) failed: {}", self.seg, e);
            return;
        }
        if let Err(e) = conn.flush() {
            log::warn!("Flush after ShmDetach failed: {}", e);
        }
        log::debug!("Detached shared memory segment {:#x}", self.seg);
    }
}

/// Capture into a server-shared memory segment.
pub struct ShmSource {
    display: Arc<X11Display>,
}

fn fatal(what: &str, e: impl std::fmt::Display) -> CaptureError {
    CaptureError::SharedMemory(format!("{}: {}", what, e))
}

impl ShmSource {
    /// Fails (fatally) when the server cannot share memory with us.
    pub fn new(display: Arc<X11Display>) -> Result<Self> {
        match display.shm_version() {
            Some(version) if version >= MIN_VERSION => Ok(Self { display }),
            Some((major, minor)) => Err(CaptureError::SharedMemory(format!(
                "MIT-SHM {}.{} cannot pass file descriptors, {}.{} required",
                major, minor, MIN_VERSION.0, MIN_VERSION.1
            ))),
            None => Err(CaptureError::SharedMemory(
                "MIT-SHM extension not available".into(),
            )),
        }
    }

    fn attach(&self, geometry: &FrameGeometry) -> Result<PixelBuffer> {
        let len = geometry.frame_len();
        let memory = SharedMemory::new(len).map_err(|e| fatal("allocating segment", e))?;
        let fd = memory.try_clone_fd().map_err(|e| fatal("duplicating segment fd", e))?;

        let conn = self.display.conn();
        let seg = conn.generate_id().map_err(|e| fatal("allocating segment id", e))?;
        conn.shm_attach_fd(seg, fd, false)
            .map_err(|e| fatal("ShmAttachFd", e))?
            .check()
            .map_err(|e| fatal("ShmAttachFd", e))?;
        log::debug!("Attached {} byte shared memory segment {:#x}", len, seg);

        let attachment = Box::new(XShmAttachment {
            display: Arc::clone(&self.display),
            seg,
        });
        PixelBuffer::shared(
            geometry.width,
            geometry.height,
            geometry.bits_per_pixel,
            geometry.stride,
            geometry.byte_order,
            memory,
            attachment,
        )
        .ok_or_else(|| CaptureError::SharedMemory("segment smaller than one frame".into()))
    }

    fn capture(&self, seg: u32, expected: usize) -> std::result::Result<(), String> {
        let (x, y, width, height) = self.display.request_area();
        let reply = self
            .display
            .conn()
            .shm_get_image(
                self.display.root(),
                x,
                y,
                width,
                height,
                !0,
                ImageFormat::Z_PIXMAP.into(),
                seg,
                0,
            )
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;
        if reply.size as usize != expected {
            return Err(format!(
                "ShmGetImage wrote {} bytes, expected {}",
                reply.size, expected
            ));
        }
        Ok(())
    }
}

impl FrameSource for ShmSource {
    fn geometry(&self) -> FrameGeometry {
        self.display.geometry()
    }

    fn area(&self) -> Rect {
        self.display.area()
    }

    fn palette(&self) -> Option<Palette> {
        self.display.palette()
    }

    fn create(&mut self) -> Result<PixelBuffer> {
        let geometry = self.display.geometry();
        let buffer = self.attach(&geometry)?;
        let seg = buffer.segment_id().unwrap_or_default();
        self.capture(seg, geometry.frame_len())
            .map_err(CaptureError::Acquisition)?;
        Ok(buffer)
    }

    fn refresh(&mut self, buffer: &mut PixelBuffer) -> bool {
        let Some(seg) = buffer.segment_id() else {
            log::warn!("Shared memory refresh on a buffer without a segment");
            return false;
        };
        match self.capture(seg, buffer.data().len()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("ShmGetImage failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_capture() {
        // Needs a running X server with MIT-SHM; skipped otherwise.
        let Ok(display) = X11Display::connect(None, Some(Rect::new(0, 0, 16, 16))) else {
            return;
        };
        let Ok(mut source) = ShmSource::new(display) else {
            return;
        };
        let mut buffer = source.create().unwrap();
        assert!(buffer.is_shared());
        assert!(source.refresh(&mut buffer));
    }
}
