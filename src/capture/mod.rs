//! Display acquisition
//!
//! A [`FrameSource`] fills [`PixelBuffer`]s from the display. Two X11
//! strategies exist: a plain `GetImage` round trip and an MIT-SHM one that
//! lets the server write straight into a shared segment. The scheduler picks
//! one when the session is configured and never looks at which it got.

pub mod shm;
pub mod x11;

use serde::{Deserialize, Serialize};

use crate::buffer::{ByteOrder, PixelBuffer};
use crate::color::{ChannelMasks, ColorLayout, Palette};
use crate::error::Result;

pub use shm::ShmSource;
pub use x11::{PlainSource, X11Display, X11Pointer};

/// Capture rectangle in root window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Overlap of two rectangles, `None` if they do not touch.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= i64::from(left) || bottom <= i64::from(top) {
            return None;
        }
        Some(Rect {
            x: left,
            y: top,
            width: (right - i64::from(left)) as u32,
            height: (bottom - i64::from(top)) as u32,
        })
    }
}

impl std::str::FromStr for Rect {
    type Err = String;

    /// Parses `WIDTHxHEIGHT+X+Y` or `x,y,w,h`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bad = || format!("Invalid area '{}'. Use WxH+X+Y or x,y,w,h", s);
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() == 4 {
            let x = parts[0].trim().parse().map_err(|_| bad())?;
            let y = parts[1].trim().parse().map_err(|_| bad())?;
            let w = parts[2].trim().parse().map_err(|_| bad())?;
            let h = parts[3].trim().parse().map_err(|_| bad())?;
            return Ok(Rect::new(x, y, w, h));
        }

        let (size, offset) = match s.find(['+', '-']) {
            Some(i) => (&s[..i], &s[i..]),
            None => (s, "+0+0"),
        };
        let (w, h) = size.split_once('x').ok_or_else(bad)?;
        let w = w.parse().map_err(|_| bad())?;
        let h = h.parse().map_err(|_| bad())?;
        let split = offset[1..]
            .find(['+', '-'])
            .map(|i| i + 1)
            .ok_or_else(bad)?;
        let x = offset[..split].parse().map_err(|_| bad())?;
        let y = offset[split..].parse().map_err(|_| bad())?;
        Ok(Rect::new(x, y, w, h))
    }
}

/// Everything needed to size a buffer and describe its pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    /// Significant bits per pixel (visual depth).
    pub depth: u32,
    pub stride: usize,
    pub byte_order: ByteOrder,
    pub masks: ChannelMasks,
}

impl FrameGeometry {
    /// Row stride for `width` pixels padded to `scanline_pad` bits.
    pub fn padded_stride(width: u32, bits_per_pixel: u32, scanline_pad: u32) -> usize {
        let pad = scanline_pad.max(8) as usize;
        let bits = width as usize * bits_per_pixel as usize;
        bits.div_ceil(pad) * pad / 8
    }

    pub fn frame_len(&self) -> usize {
        self.stride * self.height as usize
    }

    pub fn color_layout(&self) -> ColorLayout {
        ColorLayout::new(self.masks, self.bits_per_pixel, self.depth)
    }

    pub fn new_buffer(&self) -> PixelBuffer {
        PixelBuffer::zeroed(
            self.width,
            self.height,
            self.bits_per_pixel,
            self.stride,
            self.byte_order,
        )
    }
}

/// Where frames come from.
pub trait FrameSource: Send {
    /// Geometry of the buffers this source produces.
    fn geometry(&self) -> FrameGeometry;

    /// Capture rectangle in root coordinates.
    fn area(&self) -> Rect;

    /// Colormap entries for indexed visuals.
    fn palette(&self) -> Option<Palette> {
        None
    }

    /// Allocate a buffer for the capture rectangle and fill it with a frame.
    fn create(&mut self) -> Result<PixelBuffer>;

    /// Overwrite `buffer` with a fresh frame without reallocating.
    ///
    /// `false` means this frame was lost; the buffer content is unspecified
    /// but still valid.
    fn refresh(&mut self, buffer: &mut PixelBuffer) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_geometry_forms() {
        assert_eq!(
            "640x480+10+20".parse::<Rect>(),
            Ok(Rect::new(10, 20, 640, 480))
        );
        assert_eq!("800x600".parse::<Rect>(), Ok(Rect::new(0, 0, 800, 600)));
        assert_eq!("5,6,7,8".parse::<Rect>(), Ok(Rect::new(5, 6, 7, 8)));
        assert_eq!(
            "100x50-4+3".parse::<Rect>(),
            Ok(Rect::new(-4, 3, 100, 50))
        );
        assert!("garbage".parse::<Rect>().is_err());
        assert!("10x+1+2".parse::<Rect>().is_err());
    }

    #[test]
    fn test_intersect() {
        let screen = Rect::new(0, 0, 100, 100);
        assert_eq!(
            screen.intersect(&Rect::new(90, -5, 20, 20)),
            Some(Rect::new(90, 0, 10, 15))
        );
        assert_eq!(screen.intersect(&Rect::new(100, 0, 5, 5)), None);
        assert_eq!(screen.intersect(&Rect::new(-10, -10, 10, 10)), None);
    }

    #[test]
    fn test_padded_stride() {
        assert_eq!(FrameGeometry::padded_stride(3, 24, 32), 12);
        assert_eq!(FrameGeometry::padded_stride(3, 16, 32), 8);
        assert_eq!(FrameGeometry::padded_stride(5, 8, 32), 8);
        assert_eq!(FrameGeometry::padded_stride(5, 32, 32), 20);
    }
}
