//! Channel layout of packed pixels
//!
//! [`ColorLayout`] turns the visual's channel masks into shift/depth/max
//! triples once per session, so compositing and sinks can pull channels out
//! of a packed pixel without looking at the masks again.

/// Raw channel masks as reported by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

/// One channel of a packed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channel {
    pub mask: u32,
    pub shift: u32,
    pub depth: u32,
    pub max: u32,
}

impl Channel {
    pub fn from_mask(mask: u32) -> Self {
        if mask == 0 {
            return Self::default();
        }
        let shift = mask.trailing_zeros();
        let depth = (mask >> shift).trailing_ones();
        let max = if depth >= 32 {
            u32::MAX
        } else {
            (1u32 << depth) - 1
        };
        Self {
            mask,
            shift,
            depth,
            max,
        }
    }

    pub fn is_present(&self) -> bool {
        self.depth > 0
    }

    /// The channel's raw value, `0..=max`.
    pub fn extract(&self, pixel: u32) -> u32 {
        (pixel >> self.shift) & self.max
    }

    /// Place a raw value (`0..=max`) at the channel's position.
    pub fn insert(&self, value: u32) -> u32 {
        (value & self.max) << self.shift
    }

    /// The channel scaled to eight bits.
    pub fn to_u8(&self, pixel: u32) -> u8 {
        match self.depth {
            0 => 0,
            8 => self.extract(pixel) as u8,
            _ => ((u64::from(self.extract(pixel)) * 255 + u64::from(self.max) / 2)
                / u64::from(self.max)) as u8,
        }
    }

    /// An eight-bit value scaled to the channel's depth and positioned.
    pub fn from_u8(&self, value: u8) -> u32 {
        match self.depth {
            0 => 0,
            8 => self.insert(u32::from(value)),
            _ => {
                let scaled = (u64::from(value) * u64::from(self.max) + 127) / 255;
                self.insert(scaled as u32)
            }
        }
    }
}

/// Per-channel layout of one session's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorLayout {
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
    pub alpha: Channel,
    pub bits_per_pixel: u32,
    /// Significant colour bits per pixel.
    pub depth: u32,
}

impl ColorLayout {
    pub fn new(masks: ChannelMasks, bits_per_pixel: u32, depth: u32) -> Self {
        let alpha_mask = if bits_per_pixel > depth {
            !(masks.red | masks.green | masks.blue) & pixel_mask(bits_per_pixel)
        } else {
            0
        };
        Self {
            red: Channel::from_mask(masks.red),
            green: Channel::from_mask(masks.green),
            blue: Channel::from_mask(masks.blue),
            alpha: Channel::from_mask(alpha_mask),
            bits_per_pixel,
            depth,
        }
    }

    /// Union of the red, green and blue masks.
    pub fn color_mask(&self) -> u32 {
        self.red.mask | self.green.mask | self.blue.mask
    }

    /// True for palette-indexed (pseudo colour) layouts.
    pub fn is_indexed(&self) -> bool {
        self.color_mask() == 0
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_present()
    }

    pub fn rgb(&self, pixel: u32) -> [u8; 3] {
        [
            self.red.to_u8(pixel),
            self.green.to_u8(pixel),
            self.blue.to_u8(pixel),
        ]
    }

    pub fn pack_rgb(&self, [r, g, b]: [u8; 3]) -> u32 {
        self.red.from_u8(r) | self.green.from_u8(g) | self.blue.from_u8(b)
    }
}

fn pixel_mask(bits_per_pixel: u32) -> u32 {
    if bits_per_pixel >= 32 {
        u32::MAX
    } else {
        (1u32 << bits_per_pixel) - 1
    }
}

/// Palette entries handed to sinks for indexed frames.
pub type Palette = Vec<[u8; 3]>;

/// A sink-prepared lookup from pixel index to colour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    entries: Palette,
}

impl ColorTable {
    pub fn new(entries: Palette) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[[u8; 3]] {
        &self.entries
    }

    pub fn lookup(&self, index: u32) -> [u8; 3] {
        self.entries
            .get(index as usize)
            .copied()
            .unwrap_or([0, 0, 0])
    }

    /// Flattened `r, g, b, r, g, b, ...` bytes, as PNG's PLTE chunk wants.
    pub fn to_plte(&self) -> Vec<u8> {
        self.entries.iter().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_masks() {
        for depth in 1..=32u32 {
            for shift in 0..=(32 - depth) {
                let mask = if depth == 32 {
                    u32::MAX
                } else {
                    ((1u32 << depth) - 1) << shift
                };
                let ch = Channel::from_mask(mask);
                assert_eq!(ch.shift, shift);
                assert_eq!(ch.depth, depth);
                assert_eq!(ch.shift + ch.depth, 32 - mask.leading_zeros());
                assert_eq!(u64::from(ch.max), (1u64 << depth) - 1);
            }
        }
    }

    #[test]
    fn test_zero_mask() {
        let ch = Channel::from_mask(0);
        assert_eq!((ch.shift, ch.depth, ch.max), (0, 0, 0));
        assert!(!ch.is_present());
        assert_eq!(ch.to_u8(0xFFFF_FFFF), 0);
    }

    #[test]
    fn test_truecolor_layout_with_alpha() {
        let masks = ChannelMasks {
            red: 0x00FF_0000,
            green: 0x0000_FF00,
            blue: 0x0000_00FF,
        };
        let layout = ColorLayout::new(masks, 32, 24);
        assert_eq!(layout.red.shift, 16);
        assert_eq!(layout.green.shift, 8);
        assert_eq!(layout.blue.shift, 0);
        assert_eq!(layout.alpha.mask, 0xFF00_0000);
        assert_eq!(layout.alpha.shift, 24);
        assert_eq!(layout.alpha.depth, 8);
        assert_eq!(layout.rgb(0x0012_3456), [0x12, 0x34, 0x56]);
        assert_eq!(layout.pack_rgb([0x12, 0x34, 0x56]), 0x0012_3456);
    }

    #[test]
    fn test_no_alpha_when_depth_fills_pixel() {
        let masks = ChannelMasks {
            red: 0xF800,
            green: 0x07E0,
            blue: 0x001F,
        };
        let layout = ColorLayout::new(masks, 16, 16);
        assert!(!layout.has_alpha());
        assert_eq!(layout.green.depth, 6);
        assert_eq!(layout.rgb(0xFFFF), [255, 255, 255]);
        assert_eq!(layout.rgb(0xF800), [255, 0, 0]);
        assert_eq!(layout.pack_rgb([255, 255, 255]), 0xFFFF);
    }

    #[test]
    fn test_indexed_layout() {
        let layout = ColorLayout::new(ChannelMasks::default(), 8, 8);
        assert!(layout.is_indexed());
        assert!(!layout.has_alpha());
    }

    #[test]
    fn test_color_table() {
        let table = ColorTable::new(vec![[1, 2, 3], [4, 5, 6]]);
        assert_eq!(table.lookup(1), [4, 5, 6]);
        assert_eq!(table.lookup(99), [0, 0, 0]);
        assert_eq!(table.to_plte(), vec![1, 2, 3, 4, 5, 6]);
    }
}
