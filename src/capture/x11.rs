//! X11 display access: connection setup, plain `GetImage` capture and the
//! pointer source.

use std::sync::Arc;

use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::shm::{self, ConnectionExt as _};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    Colormap, ConnectionExt as _, ImageFormat, ImageOrder, VisualClass, Window,
};
use x11rb::rust_connection::RustConnection;

use super::{FrameGeometry, FrameSource, Rect};
use crate::buffer::{ByteOrder, PixelBuffer};
use crate::color::{ChannelMasks, Palette};
use crate::cursor::{ArgbGlyph, MonoPixels, PointerSnapshot, PointerSource};
use crate::error::{CaptureError, Result};

/// An open display plus everything resolved about its root window.
pub struct X11Display {
    conn: RustConnection,
    root: Window,
    colormap: Colormap,
    area: Rect,
    geometry: FrameGeometry,
    mono: MonoPixels,
    shm_version: Option<(u16, u16)>,
    xfixes: bool,
}

impl X11Display {
    /// Connect to `display` (or `$DISPLAY`) and resolve the capture area,
    /// clamped to the screen. `None` captures the whole root window.
    pub fn connect(display: Option<&str>, area: Option<Rect>) -> Result<Arc<Self>> {
        let (conn, screen_num) = x11rb::connect(display)?;
        let setup = conn.setup();
        let screen = setup
            .roots
            .get(screen_num)
            .ok_or_else(|| CaptureError::Config(format!("screen {} does not exist", screen_num)))?;

        let screen_rect = Rect::new(
            0,
            0,
            u32::from(screen.width_in_pixels),
            u32::from(screen.height_in_pixels),
        );
        let requested = area.unwrap_or(screen_rect);
        let area = screen_rect.intersect(&requested).ok_or_else(|| {
            CaptureError::Config(format!(
                "capture area {:?} lies outside the {}x{} screen",
                requested, screen_rect.width, screen_rect.height
            ))
        })?;
        if area != requested {
            log::warn!("Capture area {:?} clamped to {:?}", requested, area);
        }

        let format = setup
            .pixmap_formats
            .iter()
            .find(|f| f.depth == screen.root_depth)
            .ok_or_else(|| {
                CaptureError::UnsupportedFormat(format!(
                    "no pixmap format for depth {}",
                    screen.root_depth
                ))
            })?;
        let bits_per_pixel = u32::from(format.bits_per_pixel);
        if !matches!(bits_per_pixel, 8 | 16 | 24 | 32) {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} bits per pixel",
                bits_per_pixel
            )));
        }

        let visual = screen
            .allowed_depths
            .iter()
            .flat_map(|d| d.visuals.iter())
            .find(|v| v.visual_id == screen.root_visual)
            .ok_or_else(|| {
                CaptureError::UnsupportedFormat(format!(
                    "root visual {:#x} not listed",
                    screen.root_visual
                ))
            })?;
        let masks = if visual.class == VisualClass::TRUE_COLOR
            || visual.class == VisualClass::DIRECT_COLOR
        {
            ChannelMasks {
                red: visual.red_mask,
                green: visual.green_mask,
                blue: visual.blue_mask,
            }
        } else {
            ChannelMasks::default()
        };

        let byte_order = if setup.image_byte_order == ImageOrder::LSB_FIRST {
            ByteOrder::LsbFirst
        } else {
            ByteOrder::MsbFirst
        };

        let geometry = FrameGeometry {
            width: area.width,
            height: area.height,
            bits_per_pixel,
            depth: u32::from(screen.root_depth),
            stride: FrameGeometry::padded_stride(
                area.width,
                bits_per_pixel,
                u32::from(format.scanline_pad),
            ),
            byte_order,
            masks,
        };
        let root = screen.root;
        let colormap = screen.default_colormap;
        let mono = MonoPixels {
            black: screen.black_pixel,
            white: screen.white_pixel,
        };

        let shm_version = match conn.extension_information(shm::X11_EXTENSION_NAME)? {
            Some(_) => {
                let v = conn.shm_query_version()?.reply()?;
                Some((v.major_version, v.minor_version))
            }
            None => None,
        };
        let xfixes = match conn.extension_information(xfixes::X11_EXTENSION_NAME)? {
            Some(_) => conn.xfixes_query_version(4, 0)?.reply()?.major_version >= 4,
            None => false,
        };
        log::debug!(
            "X11 extensions: MIT-SHM {:?}, XFIXES>=4 {}",
            shm_version,
            xfixes
        );

        log::info!(
            "Display {}: capturing {}x{}+{}+{}, {} bpp, depth {}, {:?}, masks {:?}",
            display.unwrap_or("$DISPLAY"),
            area.width,
            area.height,
            area.x,
            area.y,
            bits_per_pixel,
            geometry.depth,
            byte_order,
            masks
        );

        Ok(Arc::new(Self {
            conn,
            root,
            colormap,
            area,
            geometry,
            mono,
            shm_version,
            xfixes,
        }))
    }

    pub(crate) fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub(crate) fn root(&self) -> Window {
        self.root
    }

    pub fn area(&self) -> Rect {
        self.area
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Black and white pixel values of the default colormap.
    pub fn mono_pixels(&self) -> MonoPixels {
        self.mono
    }

    pub fn shm_version(&self) -> Option<(u16, u16)> {
        self.shm_version
    }

    pub fn has_xfixes(&self) -> bool {
        self.xfixes
    }

    /// Area origin and size as the protocol wants them.
    pub(crate) fn request_area(&self) -> (i16, i16, u16, u16) {
        (
            self.area.x as i16,
            self.area.y as i16,
            self.area.width as u16,
            self.area.height as u16,
        )
    }

    /// The 256 colormap entries of an indexed visual.
    pub fn palette(&self) -> Option<Palette> {
        if self.geometry.bits_per_pixel != 8 || self.geometry.masks != ChannelMasks::default() {
            return None;
        }
        let pixels: Vec<u32> = (0..256).collect();
        let reply = self
            .conn
            .query_colors(self.colormap, &pixels)
            .map_err(CaptureError::from)
            .and_then(|cookie| cookie.reply().map_err(CaptureError::from));
        match reply {
            Ok(reply) => Some(
                reply
                    .colors
                    .iter()
                    .map(|c| [(c.red >> 8) as u8, (c.green >> 8) as u8, (c.blue >> 8) as u8])
                    .collect(),
            ),
            Err(e) => {
                log::warn!("Failed to read colormap: {}", e);
                None
            }
        }
    }

    fn get_image(&self) -> Result<Vec<u8>> {
        let (x, y, width, height) = self.request_area();
        let reply = self
            .conn
            .get_image(ImageFormat::Z_PIXMAP, self.root, x, y, width, height, !0)?
            .reply()?;
        Ok(reply.data)
    }
}

/// Capture through a `GetImage` round trip per frame.
pub struct PlainSource {
    display: Arc<X11Display>,
}

impl PlainSource {
    pub fn new(display: Arc<X11Display>) -> Self {
        Self { display }
    }
}

impl FrameSource for PlainSource {
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
        let data = self.display.get_image()?;
        let mut buffer = self.display.geometry().new_buffer();
        if !buffer.copy_from(&data) {
            return Err(CaptureError::Acquisition(format!(
                "GetImage returned {} bytes, expected {}",
                data.len(),
                buffer.data().len()
            )));
        }
        Ok(buffer)
    }

    fn refresh(&mut self, buffer: &mut PixelBuffer) -> bool {
        match self.display.get_image() {
            Ok(data) => {
                if buffer.copy_from(&data) {
                    true
                } else {
                    log::warn!(
                        "GetImage returned {} bytes, expected {}",
                        data.len(),
                        buffer.data().len()
                    );
                    false
                }
            }
            Err(e) => {
                log::warn!("GetImage failed: {}", e);
                false
            }
        }
    }
}

/// Pointer position (and image, with XFIXES) from the display.
pub struct X11Pointer {
    display: Arc<X11Display>,
    warned_no_xfixes: bool,
}

impl X11Pointer {
    pub fn new(display: Arc<X11Display>) -> Self {
        Self {
            display,
            warned_no_xfixes: false,
        }
    }
}

fn pointer_err(e: impl std::fmt::Display) -> CaptureError {
    CaptureError::Pointer(e.to_string())
}

impl PointerSource for X11Pointer {
    fn locate(&mut self, with_image: bool) -> Result<PointerSnapshot> {
        let conn = self.display.conn();

        if with_image && self.display.has_xfixes() {
            let reply = conn
                .xfixes_get_cursor_image()
                .map_err(pointer_err)?
                .reply()
                .map_err(pointer_err)?;
            let glyph = ArgbGlyph::from_premultiplied(
                u32::from(reply.width),
                u32::from(reply.height),
                u32::from(reply.xhot),
                u32::from(reply.yhot),
                &reply.cursor_image,
            );
            return Ok(PointerSnapshot {
                x: i32::from(reply.x),
                y: i32::from(reply.y),
                image: Some(glyph),
            });
        }

        if with_image && !self.warned_no_xfixes {
            log::warn!("XFIXES not available, compositing the synthetic pointer instead");
            self.warned_no_xfixes = true;
        }

        let reply = conn
            .query_pointer(self.display.root())
            .map_err(pointer_err)?
            .reply()
            .map_err(pointer_err)?;
        if !reply.same_screen {
            return Err(CaptureError::Pointer("pointer is on another screen".into()));
        }
        Ok(PointerSnapshot {
            x: i32::from(reply.root_x),
            y: i32::from(reply.root_y),
            image: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_capture() {
        // Needs a running X server; skipped otherwise.
        let Ok(display) = X11Display::connect(None, Some(Rect::new(0, 0, 32, 16))) else {
            return;
        };
        let geometry = display.geometry();
        assert_eq!((geometry.width, geometry.height), (32, 16));

        let mut source = PlainSource::new(Arc::clone(&display));
        let mut buffer = source.create().unwrap();
        assert_eq!(buffer.data().len(), geometry.frame_len());
        assert!(source.refresh(&mut buffer));

        let mut pointer = X11Pointer::new(display);
        assert!(pointer.locate(false).is_ok());
    }
}
