//! Built-in arrow pointer, painted with AND/OR masks

use crate::buffer::PixelBuffer;
use crate::color::ColorLayout;

use super::{Clip, MonoPixels};

pub const GLYPH_WIDTH: u32 = 16;
pub const GLYPH_HEIGHT: u32 = 20;

/// Outline bits, one row per entry, bit 15 is the leftmost column.
pub const BLACK: [u16; GLYPH_HEIGHT as usize] = [
    0x8000, 0xC000, 0xA000, 0x9000, 0x8800, 0x8400, 0x8200, 0x8100, 0x8080, 0x8040, 0x83E0,
    0x9200, 0xA900, 0xC900, 0x8480, 0x0480, 0x0240, 0x0240, 0x0180, 0x0000,
];

/// Fill bits.
pub const WHITE: [u16; GLYPH_HEIGHT as usize] = [
    0x0000, 0x0000, 0x4000, 0x6000, 0x7000, 0x7800, 0x7C00, 0x7E00, 0x7F00, 0x7F80, 0x7C00,
    0x6C00, 0x4600, 0x0600, 0x0300, 0x0300, 0x0180, 0x0180, 0x0000, 0x0000,
];

/// AND and OR masks for one glyph bit over a pixel with colour bits `color_mask`.
pub fn masks(black: bool, white: bool, color_mask: u32) -> (u32, u32) {
    let and_mask = if black { !color_mask } else { u32::MAX };
    let or_mask = if white { color_mask } else { 0 };
    (and_mask, or_mask)
}

pub(crate) fn paint(buffer: &mut PixelBuffer, layout: &ColorLayout, mono: MonoPixels, clip: Clip) {
    let indexed = buffer.bits_per_pixel() == 8 || layout.is_indexed();
    let color_mask = layout.color_mask();

    for row in 0..clip.height {
        let gy = (clip.glyph_y + row) as usize;
        let (black_row, white_row) = (BLACK[gy], WHITE[gy]);
        if black_row | white_row == 0 {
            continue;
        }
        let y = clip.buf_y + row;

        for col in 0..clip.width {
            let bit = 0x8000u16 >> (clip.glyph_x + col);
            let black = black_row & bit != 0;
            let white = white_row & bit != 0;
            if !black && !white {
                continue;
            }
            let x = clip.buf_x + col;

            if indexed {
                buffer.set_pixel(x, y, if black { mono.black } else { mono.white });
                continue;
            }

            let (and_mask, or_mask) = masks(black, white, color_mask);
            if let Some(pixel) = buffer.pixel(x, y) {
                buffer.set_pixel(x, y, (pixel & and_mask) | or_mask);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteOrder;
    use crate::color::ChannelMasks;

    #[test]
    fn test_outline_and_fill_are_disjoint() {
        for (b, w) in BLACK.iter().zip(WHITE.iter()) {
            assert_eq!(b & w, 0);
        }
    }

    #[test]
    fn test_masks() {
        let cm = 0x00FF_FFFF;
        assert_eq!(masks(true, false, cm), (0xFF00_0000, 0));
        assert_eq!(masks(false, true, cm), (u32::MAX, cm));
        assert_eq!(masks(false, false, cm), (u32::MAX, 0));
    }

    #[test]
    fn test_paint_keeps_non_color_bits() {
        let layout = ColorLayout::new(
            ChannelMasks {
                red: 0x00FF_0000,
                green: 0x0000_FF00,
                blue: 0x0000_00FF,
            },
            32,
            24,
        );
        let mut buf = PixelBuffer::zeroed(16, 20, 32, 64, ByteOrder::LsbFirst);
        for y in 0..20 {
            for x in 0..16 {
                buf.set_pixel(x, y, 0xAB12_3456);
            }
        }
        let clip = Clip {
            buf_x: 0,
            buf_y: 0,
            glyph_x: 0,
            glyph_y: 0,
            width: 16,
            height: 20,
        };
        paint(&mut buf, &layout, MonoPixels::default(), clip);

        // (0, 0) outline, (1, 2) fill, (15, 0) transparent
        assert_eq!(buf.pixel(0, 0), Some(0xAB00_0000));
        assert_eq!(buf.pixel(1, 2), Some(0xABFF_FFFF));
        assert_eq!(buf.pixel(15, 0), Some(0xAB12_3456));
    }

    #[test]
    fn test_paint_indexed_uses_mono_pixels() {
        let layout = ColorLayout::new(ChannelMasks::default(), 8, 8);
        let mut buf = PixelBuffer::zeroed(4, 4, 8, 4, ByteOrder::LsbFirst);
        buf.data_mut().fill(42);
        let clip = Clip {
            buf_x: 1,
            buf_y: 0,
            glyph_x: 0,
            glyph_y: 2,
            width: 3,
            height: 2,
        };
        let mono = MonoPixels { black: 1, white: 2 };
        paint(&mut buf, &layout, mono, clip);

        // glyph row 2: outline, fill, outline; row 3: outline, fill, fill
        assert_eq!(buf.row(0).unwrap(), &[42, 1, 2, 1]);
        assert_eq!(buf.row(1).unwrap(), &[42, 1, 2, 2]);
        assert_eq!(buf.row(2).unwrap(), &[42, 42, 42, 42]);
    }
}
