//! Pointer compositing
//!
//! The display server leaves the pointer out of captured images, so each
//! frame gets one painted back in. Two glyphs exist:
//!
//! | Mode | Glyph | Algorithm |
//! |------|-------|-----------|
//! | `synthetic` | built-in 16x20 arrow | AND/OR masks over the colour bits |
//! | `real` | server's current cursor image (XFIXES) | alpha blend via lookup tables |
//!
//! Only the part of the glyph that overlaps the capture rectangle is ever
//! touched.

pub mod bitmap;
pub mod blend;

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::capture::Rect;
use crate::color::ColorLayout;
use crate::error::Result;

pub use blend::BlendTables;

/// Which pointer glyph (if any) gets composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    None,
    Synthetic,
    #[default]
    Real,
}

impl std::str::FromStr for CursorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(CursorMode::None),
            "synthetic" | "bitmap" => Ok(CursorMode::Synthetic),
            "real" | "xfixes" => Ok(CursorMode::Real),
            _ => Err(format!(
                "Unknown cursor mode '{}'. Use: none, synthetic, real",
                s
            )),
        }
    }
}

/// True-colour pointer image with straight (non-premultiplied) alpha.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgbGlyph {
    pub width: u32,
    pub height: u32,
    pub xhot: u32,
    pub yhot: u32,
    /// `0xAARRGGBB`, row-major.
    pub pixels: Vec<u32>,
}

impl ArgbGlyph {
    /// Convert a premultiplied ARGB image, as XFIXES delivers it.
    pub fn from_premultiplied(
        width: u32,
        height: u32,
        xhot: u32,
        yhot: u32,
        pixels: &[u32],
    ) -> Self {
        let pixels = pixels
            .iter()
            .map(|&px| {
                let a = px >> 24;
                if a == 0 {
                    return 0;
                }
                let un = |c: u32| ((c * 255 + a / 2) / a).min(255);
                let r = un((px >> 16) & 0xFF);
                let g = un((px >> 8) & 0xFF);
                let b = un(px & 0xFF);
                (a << 24) | (r << 16) | (g << 8) | b
            })
            .collect();
        Self {
            width,
            height,
            xhot,
            yhot,
            pixels,
        }
    }
}

/// Pointer position in root coordinates, with the current image if asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerSnapshot {
    pub x: i32,
    pub y: i32,
    pub image: Option<ArgbGlyph>,
}

/// Where the pointer is right now.
pub trait PointerSource: Send {
    /// Locate the pointer. `with_image` asks for the real cursor glyph too.
    ///
    /// Errors are frame-local: the frame is emitted without a pointer.
    fn locate(&mut self, with_image: bool) -> Result<PointerSnapshot>;
}

/// Pixel values painted for the synthetic glyph on indexed visuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonoPixels {
    pub black: u32,
    pub white: u32,
}

impl Default for MonoPixels {
    fn default() -> Self {
        Self {
            black: 0,
            white: 0xFF,
        }
    }
}

/// The part of a glyph that lands inside the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Clip {
    pub buf_x: u32,
    pub buf_y: u32,
    pub glyph_x: u32,
    pub glyph_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Clip {
    /// Intersect a glyph whose top-left sits at `(left, top)` in buffer
    /// coordinates with a `buf_w` x `buf_h` buffer.
    pub fn compute(left: i32, top: i32, glyph_w: u32, glyph_h: u32, buf_w: u32, buf_h: u32) -> Option<Self> {
        let glyph = Rect::new(left, top, glyph_w, glyph_h);
        let inside = glyph.intersect(&Rect::new(0, 0, buf_w, buf_h))?;
        Some(Self {
            buf_x: inside.x as u32,
            buf_y: inside.y as u32,
            glyph_x: (inside.x - left) as u32,
            glyph_y: (inside.y - top) as u32,
            width: inside.width,
            height: inside.height,
        })
    }
}

/// Per-session compositor state.
pub struct CursorOverlay {
    mode: CursorMode,
    mono: MonoPixels,
    tables: Option<BlendTables>,
}

impl CursorOverlay {
    pub fn new(mode: CursorMode, mono: MonoPixels) -> Self {
        Self {
            mode,
            mono,
            tables: None,
        }
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != CursorMode::None
    }

    pub fn wants_image(&self) -> bool {
        self.mode == CursorMode::Real
    }

    /// Called on every session start; blend tables are rebuilt here.
    pub fn prepare(&mut self, layout: &ColorLayout) {
        self.tables = (self.mode == CursorMode::Real && !layout.is_indexed()).then(BlendTables::new);
    }

    /// Paint the pointer into `buffer`, which covers `area` of the root
    /// window. Returns whether any pixel was touched.
    pub fn composite(
        &self,
        buffer: &mut PixelBuffer,
        layout: &ColorLayout,
        area: &Rect,
        pointer: &PointerSnapshot,
    ) -> bool {
        if self.mode == CursorMode::None {
            return false;
        }

        if let (Some(image), Some(tables)) = (&pointer.image, &self.tables) {
            let left = pointer.x - image.xhot as i32 - area.x;
            let top = pointer.y - image.yhot as i32 - area.y;
            return match Clip::compute(left, top, image.width, image.height, buffer.width(), buffer.height()) {
                Some(clip) => {
                    blend::paint(buffer, layout, tables, image, clip);
                    true
                }
                None => false,
            };
        }

        let left = pointer.x - area.x;
        let top = pointer.y - area.y;
        match Clip::compute(
            left,
            top,
            bitmap::GLYPH_WIDTH,
            bitmap::GLYPH_HEIGHT,
            buffer.width(),
            buffer.height(),
        ) {
            Some(clip) => {
                bitmap::paint(buffer, layout, self.mono, clip);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteOrder;
    use crate::color::ChannelMasks;

    fn rgb_layout() -> ColorLayout {
        ColorLayout::new(
            ChannelMasks {
                red: 0x00FF_0000,
                green: 0x0000_FF00,
                blue: 0x0000_00FF,
            },
            32,
            24,
        )
    }

    fn filled(width: u32, height: u32, value: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::zeroed(width, height, 32, width as usize * 4, ByteOrder::LsbFirst);
        for y in 0..height {
            for x in 0..width {
                buf.set_pixel(x, y, value);
            }
        }
        buf
    }

    fn solid_glyph(size: u32, argb: u32) -> ArgbGlyph {
        ArgbGlyph {
            width: size,
            height: size,
            xhot: 0,
            yhot: 0,
            pixels: vec![argb; (size * size) as usize],
        }
    }

    #[test]
    fn test_clip_partial_overlap() {
        let clip = Clip::compute(-3, 8, 16, 20, 10, 10).unwrap();
        assert_eq!(
            clip,
            Clip {
                buf_x: 0,
                buf_y: 8,
                glyph_x: 3,
                glyph_y: 0,
                width: 10,
                height: 2,
            }
        );
        assert!(Clip::compute(10, 0, 16, 20, 10, 10).is_none());
        assert!(Clip::compute(-16, 0, 16, 20, 10, 10).is_none());
    }

    #[test]
    fn test_outside_area_leaves_buffer_untouched() {
        let layout = rgb_layout();
        let area = Rect::new(100, 100, 8, 8);
        let before = filled(8, 8, 0x0012_3456);

        for mode in [CursorMode::Synthetic, CursorMode::Real] {
            let mut overlay = CursorOverlay::new(mode, MonoPixels::default());
            overlay.prepare(&layout);
            let mut buf = filled(8, 8, 0x0012_3456);
            for (x, y) in [(0, 0), (50, 150), (108, 100), (100, 108), (80, 90)] {
                let pointer = PointerSnapshot {
                    x,
                    y,
                    image: Some(solid_glyph(4, 0xFFFF_FFFF)),
                };
                assert!(!overlay.composite(&mut buf, &layout, &area, &pointer));
            }
            assert_eq!(buf.data(), before.data());
        }
    }

    #[test]
    fn test_real_mode_blends_glyph() {
        let layout = rgb_layout();
        let mut overlay = CursorOverlay::new(CursorMode::Real, MonoPixels::default());
        overlay.prepare(&layout);
        let mut buf = filled(4, 4, 0x0000_0000);
        let pointer = PointerSnapshot {
            x: 11,
            y: 11,
            image: Some(ArgbGlyph {
                xhot: 1,
                yhot: 1,
                ..solid_glyph(2, 0xFFFF_0000)
            }),
        };
        assert!(overlay.composite(&mut buf, &layout, &Rect::new(10, 10, 4, 4), &pointer));
        assert_eq!(buf.pixel(0, 0), Some(0x00FF_0000));
        assert_eq!(buf.pixel(1, 1), Some(0x00FF_0000));
        assert_eq!(buf.pixel(2, 2), Some(0));
    }

    #[test]
    fn test_real_mode_without_image_falls_back_to_bitmap() {
        let layout = rgb_layout();
        let mut overlay = CursorOverlay::new(CursorMode::Real, MonoPixels::default());
        overlay.prepare(&layout);
        let mut buf = filled(20, 20, 0x0080_8080);
        let pointer = PointerSnapshot {
            x: 0,
            y: 0,
            image: None,
        };
        assert!(overlay.composite(&mut buf, &layout, &Rect::new(0, 0, 20, 20), &pointer));
        // Tip of the arrow is black
        assert_eq!(buf.pixel(0, 0), Some(0));
    }

    #[test]
    fn test_disabled_overlay() {
        let layout = rgb_layout();
        let overlay = CursorOverlay::new(CursorMode::None, MonoPixels::default());
        let mut buf = filled(4, 4, 7);
        let pointer = PointerSnapshot {
            x: 0,
            y: 0,
            image: None,
        };
        assert!(!overlay.composite(&mut buf, &layout, &Rect::new(0, 0, 4, 4), &pointer));
        assert_eq!(buf.pixel(0, 0), Some(7));
    }

    #[test]
    fn test_unpremultiply() {
        let glyph = ArgbGlyph::from_premultiplied(2, 1, 0, 0, &[0x8040_2000, 0x0012_3456]);
        assert_eq!(glyph.pixels[0], 0x8080_4000);
        assert_eq!(glyph.pixels[1], 0);
    }

    #[test]
    fn test_parse_cursor_mode() {
        assert_eq!("REAL".parse::<CursorMode>(), Ok(CursorMode::Real));
        assert_eq!("bitmap".parse::<CursorMode>(), Ok(CursorMode::Synthetic));
        assert!("sparkly".parse::<CursorMode>().is_err());
    }
}
