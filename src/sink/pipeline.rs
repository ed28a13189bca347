//! GStreamer pipeline construction and management
//!
//! Each segment gets its own `appsrc ! videoconvert ! <encoder> ! <muxer> !
//! filesink` pipeline, fed with raw frames in whatever layout the display
//! produces when GStreamer has a name for it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use gst_video::VideoFormat;

use super::encoder::{EncoderInfo, select_encoder};
use super::{FrameSink, OutputMode, SinkFormat, to_rgb8};
use crate::buffer::{ByteOrder, PixelBuffer};
use crate::capture::FrameGeometry;
use crate::color::{ColorLayout, ColorTable};
use crate::config::Container;

/// Frames per second as a GStreamer fraction of `1000 / interval_ms`.
pub fn frame_rate(interval_ms: u64) -> Result<gst::Fraction> {
    let denom = i32::try_from(interval_ms.max(1))
        .with_context(|| format!("Frame interval of {} ms is too long", interval_ms))?;
    Ok(gst::Fraction::new(1000, denom))
}

/// Raw video format matching the frame bytes, if GStreamer has one.
pub fn raw_format(geometry: &FrameGeometry) -> Option<VideoFormat> {
    let m = geometry.masks;
    let rgb = (m.red, m.green, m.blue);
    let lsb = geometry.byte_order == ByteOrder::LsbFirst;

    match (geometry.bits_per_pixel, rgb) {
        (32, (0xFF_0000, 0xFF00, 0xFF)) => Some(if lsb { VideoFormat::Bgrx } else { VideoFormat::Xrgb }),
        (32, (0xFF, 0xFF00, 0xFF_0000)) => Some(if lsb { VideoFormat::Rgbx } else { VideoFormat::Xbgr }),
        (24, (0xFF_0000, 0xFF00, 0xFF)) => Some(if lsb { VideoFormat::Bgr } else { VideoFormat::Rgb }),
        (24, (0xFF, 0xFF00, 0xFF_0000)) => Some(if lsb { VideoFormat::Rgb } else { VideoFormat::Bgr }),
        // RGB16 is host-endian
        (16, (0xF800, 0x07E0, 0x001F)) if lsb == cfg!(target_endian = "little") => {
            Some(VideoFormat::Rgb16)
        }
        _ => None,
    }
}

/// One open output file
struct Segment {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    output_path: PathBuf,
    info: gst_video::VideoInfo,
    /// Frames need converting to RGBx before pushing
    convert: bool,
    interval_ms: u64,
    frames: u64,
}

impl Drop for Segment {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Streaming sink encoding each segment into one video file
pub struct StreamSink {
    encoder: EncoderInfo,
    container: Container,
    segment: Option<Segment>,
}

impl StreamSink {
    pub fn new(container: Container, preferred_encoder: Option<&str>) -> Result<Self> {
        let encoder = select_encoder(container, preferred_encoder)?;
        log::info!(
            "Using encoder: {} ({:?}) into {:?}",
            encoder.display_name(),
            encoder.codec,
            container
        );
        Ok(Self {
            encoder,
            container,
            segment: None,
        })
    }

    pub fn encoder(&self) -> &EncoderInfo {
        &self.encoder
    }

    fn build(&self, output_path: &Path, format: &SinkFormat) -> Result<Segment> {
        gst::init().context("Failed to initialize GStreamer")?;

        let geometry = &format.geometry;
        let (video_format, convert) = match raw_format(geometry) {
            Some(f) => (f, false),
            None => {
                log::info!(
                    "No GStreamer format for {} bpp {:?}, converting frames to RGBx",
                    geometry.bits_per_pixel,
                    geometry.masks
                );
                (VideoFormat::Rgbx, true)
            }
        };
        let info = gst_video::VideoInfo::builder(video_format, geometry.width, geometry.height)
            .fps(frame_rate(format.interval_ms)?)
            .build()
            .context("Failed to describe raw video")?;

        let pipeline = gst::Pipeline::new();

        // Create elements
        let appsrc = gst_app::AppSrc::builder()
            .name("screen-source")
            .is_live(true)
            .format(gst::Format::Time)
            .caps(&info.to_caps().context("Failed to build caps")?)
            .build();

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .context("Failed to create videoconvert element")?;

        let encoder_elem = gst::ElementFactory::make(&self.encoder.gst_element)
            .build()
            .with_context(|| format!("Failed to create encoder: {}", self.encoder.gst_element))?;

        let mut elements = vec![appsrc.clone().upcast::<gst::Element>(), videoconvert, encoder_elem];

        if let Some(parser) = self.encoder.codec.parser_element() {
            elements.push(
                gst::ElementFactory::make(parser)
                    .build()
                    .with_context(|| format!("Failed to create parser: {}", parser))?,
            );
        }

        elements.push(
            gst::ElementFactory::make(self.container.muxer_element())
                .build()
                .with_context(|| format!("Failed to create muxer: {}", self.container.muxer_element()))?,
        );

        let location = output_path
            .to_str()
            .context("Output path is not valid UTF-8")?;
        elements.push(
            gst::ElementFactory::make("filesink")
                .property("location", location)
                .build()
                .context("Failed to create filesink element")?,
        );

        pipeline.add_many(&elements)?;
        gst::Element::link_many(&elements)?;

        pipeline
            .set_state(gst::State::Playing)
            .context("Failed to start pipeline")?;

        log::info!(
            "Recording segment {} ({}x{} {:?} @ {} ms/frame)",
            output_path.display(),
            geometry.width,
            geometry.height,
            video_format,
            format.interval_ms
        );

        Ok(Segment {
            pipeline,
            appsrc,
            output_path: output_path.to_path_buf(),
            info,
            convert,
            interval_ms: format.interval_ms,
            frames: 0,
        })
    }
}

impl Segment {
    /// Push a video frame to the pipeline
    fn push_frame(
        &mut self,
        buffer: &PixelBuffer,
        layout: &ColorLayout,
        colors: Option<&ColorTable>,
    ) -> Result<()> {
        let mut gst_buffer = gst::Buffer::with_size(self.info.size())
            .context("Failed to allocate GStreamer buffer")?;

        {
            let buffer_mut = gst_buffer
                .get_mut()
                .context("GStreamer buffer is not writable")?;
            buffer_mut.set_pts(gst::ClockTime::from_mseconds(self.frames * self.interval_ms));
            buffer_mut.set_duration(gst::ClockTime::from_mseconds(self.interval_ms));
            let mut map = buffer_mut
                .map_writable()
                .context("Failed to map buffer for writing")?;

            let dst_stride = self.info.stride()[0] as usize;
            let (packed, src_stride, row_bytes) = if self.convert {
                let width = buffer.width() as usize * 4;
                (Some(to_rgb8(buffer, layout, colors, Some(0xFF))), width, width)
            } else {
                let width = buffer.width() as usize * buffer.bytes_per_pixel();
                (None, buffer.stride(), width)
            };
            let src = packed.as_deref().unwrap_or_else(|| buffer.data());

            for (dst_row, src_row) in map
                .as_mut_slice()
                .chunks_mut(dst_stride)
                .zip(src.chunks(src_stride))
            {
                let n = row_bytes.min(dst_row.len()).min(src_row.len());
                dst_row[..n].copy_from_slice(&src_row[..n]);
            }
        }

        self.appsrc
            .push_buffer(gst_buffer)
            .map_err(|e| anyhow!("Failed to push buffer to pipeline: {:?}", e))?;
        self.frames += 1;

        Ok(())
    }

    /// Signal end of stream and finalize the video file
    fn finish(&self) -> Result<()> {
        log::info!("Sending EOS signal to pipeline...");
        self.appsrc
            .end_of_stream()
            .map_err(|e| anyhow!("Failed to send EOS: {:?}", e))?;

        // Wait for EOS to propagate through pipeline (30 seconds for long recordings)
        log::info!("Waiting for pipeline to finish (up to 30 seconds)...");
        let bus = self.pipeline.bus().context("Pipeline has no bus")?;
        let mut eos_received = false;
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
            use gst::MessageView;
            match msg.view() {
                MessageView::Eos(..) => {
                    log::info!("EOS received, finalizing...");
                    eos_received = true;
                    break;
                }
                MessageView::Error(err) => {
                    let _ = self.pipeline.set_state(gst::State::Null);
                    bail!(
                        "Pipeline error: {} ({})",
                        err.error(),
                        err.debug().unwrap_or_default()
                    );
                }
                _ => {}
            }
        }

        if !eos_received {
            log::warn!("EOS timeout reached, forcing pipeline shutdown");
        }

        self.pipeline
            .set_state(gst::State::Null)
            .context("Failed to stop pipeline")?;

        // Verify output file exists and has data
        self.verify_output()
    }

    /// Verify that the output file exists and has data
    fn verify_output(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.output_path).with_context(|| {
            format!(
                "Output file was not created: {}",
                self.output_path.display()
            )
        })?;

        if metadata.len() == 0 {
            bail!("Output file is empty: {}", self.output_path.display());
        }

        log::info!(
            "Output file verified: {} ({} frames, {} bytes)",
            self.output_path.display(),
            self.frames,
            metadata.len()
        );

        Ok(())
    }
}

impl FrameSink for StreamSink {
    fn mode(&self) -> OutputMode {
        OutputMode::Stream
    }

    fn open(&mut self, target: &Path, format: &SinkFormat) -> Result<()> {
        if self.segment.is_some() {
            self.close()?;
        }
        self.segment = Some(self.build(target, format)?);
        Ok(())
    }

    fn write(
        &mut self,
        buffer: &PixelBuffer,
        layout: &ColorLayout,
        colors: Option<&ColorTable>,
    ) -> Result<()> {
        let segment = self.segment.as_mut().context("No video segment open")?;
        segment.push_frame(buffer, layout, colors)
    }

    fn close(&mut self) -> Result<()> {
        match self.segment.take() {
            Some(segment) => segment.finish(),
            None => Ok(()),
        }
    }

    fn clean(&mut self) {
        if let Some(segment) = self.segment.take() {
            log::debug!("Tearing down pipeline for {}", segment.output_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ChannelMasks;

    fn geometry(bpp: u32, order: ByteOrder, red: u32, green: u32, blue: u32) -> FrameGeometry {
        FrameGeometry {
            width: 8,
            height: 2,
            bits_per_pixel: bpp,
            depth: 24,
            stride: FrameGeometry::padded_stride(8, bpp, 32),
            byte_order: order,
            masks: ChannelMasks { red, green, blue },
        }
    }

    #[test]
    fn test_frame_rate() {
        assert_eq!(frame_rate(100).unwrap(), gst::Fraction::new(1000, 100));
        assert_eq!(frame_rate(0).unwrap(), gst::Fraction::new(1000, 1));
        assert!(frame_rate(u64::from(i32::MAX as u32) + 1).is_err());
    }

    #[test]
    fn test_raw_format_32bpp() {
        let (lsb, msb) = (ByteOrder::LsbFirst, ByteOrder::MsbFirst);
        let f = |order, r, b| raw_format(&geometry(32, order, r, 0xFF00, b));
        assert_eq!(f(lsb, 0xFF_0000, 0xFF), Some(VideoFormat::Bgrx));
        assert_eq!(f(msb, 0xFF_0000, 0xFF), Some(VideoFormat::Xrgb));
        assert_eq!(f(lsb, 0xFF, 0xFF_0000), Some(VideoFormat::Rgbx));
        assert_eq!(f(msb, 0xFF, 0xFF_0000), Some(VideoFormat::Xbgr));
    }

    #[test]
    fn test_raw_format_24bpp() {
        let g = geometry(24, ByteOrder::LsbFirst, 0xFF_0000, 0xFF00, 0xFF);
        assert_eq!(raw_format(&g), Some(VideoFormat::Bgr));
        let g = geometry(24, ByteOrder::MsbFirst, 0xFF_0000, 0xFF00, 0xFF);
        assert_eq!(raw_format(&g), Some(VideoFormat::Rgb));
    }

    #[test]
    fn test_raw_format_falls_back() {
        // 10-bit channels
        let g = geometry(32, ByteOrder::LsbFirst, 0x3FF0_0000, 0x000F_FC00, 0x0000_03FF);
        assert_eq!(raw_format(&g), None);
        // 5-5-5
        let g = geometry(16, ByteOrder::LsbFirst, 0x7C00, 0x03E0, 0x001F);
        assert_eq!(raw_format(&g), None);
        // indexed
        let g = geometry(8, ByteOrder::LsbFirst, 0, 0, 0);
        assert_eq!(raw_format(&g), None);
    }

    #[test]
    fn test_stream_sink_records_segment() {
        // Needs GStreamer with an MKV-capable encoder; skipped otherwise.
        let Ok(mut sink) = StreamSink::new(Container::Mkv, None) else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mkv");
        let geometry = geometry(32, ByteOrder::LsbFirst, 0xFF_0000, 0xFF00, 0xFF);
        let format = SinkFormat {
            geometry,
            interval_ms: 100,
        };
        let layout = geometry.color_layout();
        let buffer = geometry.new_buffer();

        if sink.open(&path, &format).is_err() {
            return;
        }
        for _ in 0..5 {
            sink.write(&buffer, &layout, None).unwrap();
        }
        sink.close().unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
