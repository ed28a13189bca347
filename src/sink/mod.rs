//! Frame sinks
//!
//! A sink serializes frames into files. Single-image sinks get a fresh
//! target per frame, streaming sinks keep one target open for a whole
//! segment. The scheduler only reacts to success or failure.

pub mod encoder;
pub mod image;
pub mod pipeline;

use std::path::Path;

use anyhow::Result;

use crate::buffer::PixelBuffer;
use crate::capture::FrameGeometry;
use crate::color::{ColorLayout, ColorTable};
use crate::config::{OutputKind, RecorderConfig};
use crate::error::CaptureError;

pub use self::image::ImageSink;
pub use self::pipeline::StreamSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One file per frame.
    SingleImage,
    /// One file per segment.
    Stream,
}

/// What a sink is told about the frames it is about to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub geometry: FrameGeometry,
    pub interval_ms: u64,
}

pub trait FrameSink: Send {
    fn mode(&self) -> OutputMode;

    /// Open `target`; fails if it cannot be created.
    fn open(&mut self, target: &Path, format: &SinkFormat) -> Result<()>;

    fn write(
        &mut self,
        buffer: &PixelBuffer,
        layout: &ColorLayout,
        colors: Option<&ColorTable>,
    ) -> Result<()>;

    /// Only palette-indexed targets return a table.
    fn color_table(&self, _palette: &[[u8; 3]]) -> Option<ColorTable> {
        None
    }

    fn close(&mut self) -> Result<()>;

    /// Release anything still held, e.g. an encoder after a failure.
    fn clean(&mut self) {}
}

/// Pick the sink the output template's extension asks for.
pub fn open_for(config: &RecorderConfig) -> std::result::Result<Box<dyn FrameSink>, CaptureError> {
    let template = config.output_template()?;
    match template.kind() {
        Some(OutputKind::Image(format)) => {
            log::info!("Writing {:?} images to {}", format, config.output);
            Ok(Box::new(ImageSink::new(format, config.jpeg_quality)))
        }
        Some(OutputKind::Video(container)) => {
            let sink = StreamSink::new(container, config.video_encoder.as_deref())
                .map_err(|e| CaptureError::Config(format!("{:#}", e)))?;
            Ok(Box::new(sink))
        }
        None => Err(CaptureError::Config(format!(
            "no writer for output '{}'",
            config.output
        ))),
    }
}

/// Convert a frame to tightly packed 8-bit RGB, appending `fill` as a
/// fourth byte per pixel when given.
pub fn to_rgb8(
    buffer: &PixelBuffer,
    layout: &ColorLayout,
    colors: Option<&ColorTable>,
    fill: Option<u8>,
) -> Vec<u8> {
    let channels = if fill.is_some() { 4 } else { 3 };
    let mut out = Vec::with_capacity(buffer.width() as usize * buffer.height() as usize * channels);
    let palette = colors.filter(|_| layout.is_indexed());

    for y in 0..buffer.height() {
        for x in 0..buffer.width() {
            let pixel = buffer.pixel(x, y).unwrap_or(0);
            let rgb = match palette {
                Some(table) => table.lookup(pixel),
                None if layout.is_indexed() => {
                    let v = pixel as u8;
                    [v, v, v]
                }
                None => layout.rgb(pixel),
            };
            out.extend_from_slice(&rgb);
            if let Some(fill) = fill {
                out.push(fill);
            }
        }
    }
    out
}
