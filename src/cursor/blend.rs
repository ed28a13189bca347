//! Alpha blending through precomputed lookup tables
//!
//! `top[a << 8 | c]` holds `c * a / 255` and `bottom[a << 8 | c]` holds
//! `c * (255 - a) / 255`, so a blended channel is two loads and an add.

use crate::buffer::PixelBuffer;
use crate::color::ColorLayout;

use super::{ArgbGlyph, Clip};

const TABLE_LEN: usize = 256 * 256;

pub struct BlendTables {
    top: Box<[u8]>,
    bottom: Box<[u8]>,
}

impl BlendTables {
    pub fn new() -> Self {
        let mut top = vec![0u8; TABLE_LEN].into_boxed_slice();
        let mut bottom = vec![0u8; TABLE_LEN].into_boxed_slice();
        for a in 0..256u32 {
            for c in 0..256u32 {
                let i = ((a << 8) | c) as usize;
                top[i] = ((c * a + 127) / 255) as u8;
                bottom[i] = ((c * (255 - a) + 127) / 255) as u8;
            }
        }
        Self { top, bottom }
    }

    #[inline]
    pub fn blend(&self, coverage: u8, src: u8, dst: u8) -> u8 {
        let row = usize::from(coverage) << 8;
        self.top[row | usize::from(src)].saturating_add(self.bottom[row | usize::from(dst)])
    }
}

impl Default for BlendTables {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn paint(
    buffer: &mut PixelBuffer,
    layout: &ColorLayout,
    tables: &BlendTables,
    glyph: &ArgbGlyph,
    clip: Clip,
) {
    let color_mask = layout.color_mask();

    for row in 0..clip.height {
        let y = clip.buf_y + row;
        let glyph_row = ((clip.glyph_y + row) * glyph.width) as usize;

        for col in 0..clip.width {
            let Some(&argb) = glyph.pixels.get(glyph_row + (clip.glyph_x + col) as usize) else {
                continue;
            };
            let coverage = (argb >> 24) as u8;
            if coverage == 0 {
                continue;
            }
            let x = clip.buf_x + col;
            let Some(dst) = buffer.pixel(x, y) else {
                continue;
            };

            let r = tables.blend(coverage, (argb >> 16) as u8, layout.red.to_u8(dst));
            let g = tables.blend(coverage, (argb >> 8) as u8, layout.green.to_u8(dst));
            let b = tables.blend(coverage, argb as u8, layout.blue.to_u8(dst));

            buffer.set_pixel(x, y, (dst & !color_mask) | layout.pack_rgb([r, g, b]));
        }
    }
}
