//! Hardware encoder detection and selection
//!
//! Queries GStreamer for available encoders and prioritizes hardware-accelerated ones

use anyhow::{Context, Result, bail};
use gstreamer as gst;

use crate::config::Container;

/// Codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    VP8,
    VP9,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H.264",
            Codec::H265 => "H.265",
            Codec::VP8 => "VP8",
            Codec::VP9 => "VP9",
        }
    }

    /// Whether `container` can carry this codec
    pub fn fits(&self, container: Container) -> bool {
        match container {
            Container::Mp4 | Container::Mkv => matches!(self, Codec::H264 | Codec::H265),
            Container::Webm => matches!(self, Codec::VP8 | Codec::VP9),
        }
    }

    /// Parser placed between encoder and muxer, if the muxer needs one
    pub fn parser_element(&self) -> Option<&'static str> {
        match self {
            Codec::H264 => Some("h264parse"),
            Codec::H265 => Some("h265parse"),
            Codec::VP8 | Codec::VP9 => None,
        }
    }
}

/// Information about an available encoder
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    /// Human-readable name (e.g., "VA-API H.264")
    pub name: String,
    /// GStreamer element name (e.g., "vaapih264enc")
    pub gst_element: String,
    /// Codec type
    pub codec: Codec,
    /// Whether this is hardware-accelerated
    pub hardware: bool,
    /// Priority (lower = better, hardware encoders have lower priority)
    pub priority: u8,
}

impl EncoderInfo {
    /// Display name with hardware/software indicator
    pub fn display_name(&self) -> String {
        let hw_indicator = if self.hardware {
            " (Hardware)"
        } else {
            " (Software)"
        };
        format!("{}{}", self.name, hw_indicator)
    }
}

/// Known encoders: element, name, codec, hardware, priority
const KNOWN_ENCODERS: &[(&str, &str, Codec, bool, u8)] = &[
    // VA-API (Intel/AMD)
    ("vaapih264enc", "VA-API H.264", Codec::H264, true, 10),
    ("vaapih265enc", "VA-API H.265", Codec::H265, true, 11),
    ("vaapivp9enc", "VA-API VP9", Codec::VP9, true, 12),
    ("vaapivp8enc", "VA-API VP8", Codec::VP8, true, 13),
    // NVENC (NVIDIA)
    ("nvh264enc", "NVENC H.264", Codec::H264, true, 20),
    ("nvh265enc", "NVENC H.265", Codec::H265, true, 21),
    // Software fallbacks
    ("x264enc", "x264 H.264", Codec::H264, false, 100),
    ("vp9enc", "VP9", Codec::VP9, false, 101),
    ("vp8enc", "VP8", Codec::VP8, false, 102),
];

/// Detect available video encoders
pub fn detect_encoders() -> Result<Vec<EncoderInfo>> {
    gst::init().context("Failed to initialize GStreamer")?;

    let mut encoders: Vec<EncoderInfo> = KNOWN_ENCODERS
        .iter()
        .filter(|(element, ..)| encoder_available(element))
        .map(|&(element, name, codec, hardware, priority)| EncoderInfo {
            name: name.to_string(),
            gst_element: element.to_string(),
            codec,
            hardware,
            priority,
        })
        .collect();

    // Sort by priority (lower first)
    encoders.sort_by_key(|e| e.priority);

    Ok(encoders)
}

/// Check if a GStreamer encoder element is available
fn encoder_available(element_name: &str) -> bool {
    gst::ElementFactory::find(element_name).is_some()
}

/// Pick an encoder for `container`
///
/// `preferred` names a GStreamer element; otherwise the best available
/// encoder whose codec fits the container wins.
pub fn select_encoder(container: Container, preferred: Option<&str>) -> Result<EncoderInfo> {
    let encoders = detect_encoders()?;
    pick(encoders, container, preferred)
}

fn pick(
    encoders: Vec<EncoderInfo>,
    container: Container,
    preferred: Option<&str>,
) -> Result<EncoderInfo> {
    if let Some(element) = preferred {
        let encoder = encoders
            .into_iter()
            .find(|e| e.gst_element == element)
            .with_context(|| {
                format!(
                    "Encoder '{}' not available. Install GStreamer plugins for this encoder.",
                    element
                )
            })?;
        if !encoder.codec.fits(container) {
            bail!(
                "Encoder '{}' produces {}, which {:?} cannot hold",
                element,
                encoder.codec.name(),
                container
            );
        }
        return Ok(encoder);
    }

    encoders
        .into_iter()
        .find(|e| e.codec.fits(container))
        .with_context(|| format!("No video encoder available for {:?}", container))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(element: &str, codec: Codec, hardware: bool, priority: u8) -> EncoderInfo {
        EncoderInfo {
            name: element.to_string(),
            gst_element: element.to_string(),
            codec,
            hardware,
            priority,
        }
    }

    #[test]
    fn test_codec_name() {
        assert_eq!(Codec::H264.name(), "H.264");
        assert_eq!(Codec::H265.name(), "H.265");
        assert_eq!(Codec::VP8.name(), "VP8");
        assert_eq!(Codec::VP9.name(), "VP9");
    }

    #[test]
    fn test_codec_fits_container() {
        assert!(Codec::H264.fits(Container::Mp4));
        assert!(Codec::H265.fits(Container::Mkv));
        assert!(!Codec::VP9.fits(Container::Mp4));
        assert!(Codec::VP8.fits(Container::Webm));
        assert!(!Codec::H264.fits(Container::Webm));
    }

    #[test]
    fn test_encoder_info_display_name() {
        let hw_encoder = EncoderInfo {
            name: "VA-API H.264".to_string(),
            gst_element: "vaapih264enc".to_string(),
            codec: Codec::H264,
            hardware: true,
            priority: 10,
        };
        assert_eq!(hw_encoder.display_name(), "VA-API H.264 (Hardware)");

        let sw_encoder = EncoderInfo {
            name: "x264 H.264".to_string(),
            gst_element: "x264enc".to_string(),
            codec: Codec::H264,
            hardware: false,
            priority: 100,
        };
        assert_eq!(sw_encoder.display_name(), "x264 H.264 (Software)");
    }

    #[test]
    fn test_pick_skips_incompatible_codecs() {
        let available = vec![
            encoder("vaapih264enc", Codec::H264, true, 10),
            encoder("vp9enc", Codec::VP9, false, 101),
        ];
        let chosen = pick(available.clone(), Container::Webm, None).unwrap();
        assert_eq!(chosen.gst_element, "vp9enc");
        let chosen = pick(available, Container::Mp4, None).unwrap();
        assert_eq!(chosen.gst_element, "vaapih264enc");
    }

    #[test]
    fn test_pick_preferred() {
        let available = vec![
            encoder("vaapih264enc", Codec::H264, true, 10),
            encoder("x264enc", Codec::H264, false, 100),
        ];
        let chosen = pick(available.clone(), Container::Mkv, Some("x264enc")).unwrap();
        assert_eq!(chosen.gst_element, "x264enc");
        assert!(pick(available.clone(), Container::Webm, Some("x264enc")).is_err());
        assert!(pick(available, Container::Mp4, Some("nvh264enc")).is_err());
    }

    #[test]
    fn test_detect_encoders_returns_sorted_list() {
        // Without GStreamer there is nothing to check
        let Ok(encoders) = detect_encoders() else {
            return;
        };
        for i in 1..encoders.len() {
            assert!(encoders[i - 1].priority <= encoders[i].priority);
        }
    }
}
