//! Single-image output: one PNG, JPEG or PPM file per frame

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ::image::ImageEncoder;
use ::image::codecs::jpeg::JpegEncoder;
use ::image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use anyhow::{Context, Result, bail};

use super::{FrameSink, OutputMode, SinkFormat, to_rgb8};
use crate::buffer::PixelBuffer;
use crate::color::{ColorLayout, ColorTable};
use crate::config::ImageFormat;

struct OpenImage {
    path: PathBuf,
    writer: BufWriter<File>,
    written: bool,
}

pub struct ImageSink {
    format: ImageFormat,
    jpeg_quality: u8,
    target: Option<OpenImage>,
}

impl ImageSink {
    pub fn new(format: ImageFormat, jpeg_quality: u8) -> Self {
        Self {
            format,
            jpeg_quality,
            target: None,
        }
    }

    fn encode_png<W: Write>(
        writer: W,
        buffer: &PixelBuffer,
        layout: &ColorLayout,
        colors: Option<&ColorTable>,
    ) -> Result<()> {
        let mut encoder = png::Encoder::new(writer, buffer.width(), buffer.height());
        encoder.set_depth(png::BitDepth::Eight);

        let data = match colors {
            Some(table) if buffer.bits_per_pixel() == 8 && layout.is_indexed() => {
                encoder.set_color(png::ColorType::Indexed);
                encoder.set_palette(table.to_plte());
                let width = buffer.width() as usize;
                (0..buffer.height())
                    .filter_map(|y| buffer.row(y))
                    .flat_map(|row| row[..width].iter().copied())
                    .collect()
            }
            _ => {
                encoder.set_color(png::ColorType::Rgb);
                to_rgb8(buffer, layout, colors, None)
            }
        };

        let mut writer = encoder.write_header().context("Failed to write PNG header")?;
        writer
            .write_image_data(&data)
            .context("Failed to write PNG data")?;
        writer.finish().context("Failed to finish PNG")?;
        Ok(())
    }
}

impl FrameSink for ImageSink {
    fn mode(&self) -> OutputMode {
        OutputMode::SingleImage
    }

    fn open(&mut self, target: &Path, _format: &SinkFormat) -> Result<()> {
        if self.target.is_some() {
            self.close()?;
        }
        let file = File::create(target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        self.target = Some(OpenImage {
            path: target.to_path_buf(),
            writer: BufWriter::new(file),
            written: false,
        });
        Ok(())
    }

    fn write(
        &mut self,
        buffer: &PixelBuffer,
        layout: &ColorLayout,
        colors: Option<&ColorTable>,
    ) -> Result<()> {
        let Some(target) = self.target.as_mut() else {
            bail!("No image file open");
        };
        if target.written {
            bail!("{} already holds a frame", target.path.display());
        }

        let (width, height) = (buffer.width(), buffer.height());
        match self.format {
            ImageFormat::Png => Self::encode_png(&mut target.writer, buffer, layout, colors)?,
            ImageFormat::Jpeg => {
                let data = to_rgb8(buffer, layout, colors, None);
                JpegEncoder::new_with_quality(&mut target.writer, self.jpeg_quality)
                    .write_image(&data, width, height, ::image::ExtendedColorType::Rgb8)
                    .context("Failed to encode JPEG")?;
            }
            ImageFormat::Ppm => {
                let data = to_rgb8(buffer, layout, colors, None);
                PnmEncoder::new(&mut target.writer)
                    .with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary))
                    .write_image(&data, width, height, ::image::ExtendedColorType::Rgb8)
                    .context("Failed to encode PPM")?;
            }
        }
        target.written = true;
        Ok(())
    }

    fn color_table(&self, palette: &[[u8; 3]]) -> Option<ColorTable> {
        (self.format == ImageFormat::Png && !palette.is_empty())
            .then(|| ColorTable::new(palette.to_vec()))
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut target) = self.target.take() else {
            return Ok(());
        };
        if target.written {
            target
                .writer
                .flush()
                .with_context(|| format!("Failed to flush {}", target.path.display()))?;
            log::debug!("Wrote {}", target.path.display());
        } else {
            drop(target.writer);
            std::fs::remove_file(&target.path)
                .with_context(|| format!("Failed to remove empty {}", target.path.display()))?;
        }
        Ok(())
    }

    fn clean(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Closing image on cleanup: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteOrder;
    use crate::capture::FrameGeometry;
    use crate::color::ChannelMasks;

    fn format() -> SinkFormat {
        SinkFormat {
            geometry: FrameGeometry {
                width: 3,
                height: 2,
                bits_per_pixel: 32,
                depth: 24,
                stride: 12,
                byte_order: ByteOrder::LsbFirst,
                masks: ChannelMasks {
                    red: 0x00FF_0000,
                    green: 0x0000_FF00,
                    blue: 0x0000_00FF,
                },
            },
            interval_ms: 100,
        }
    }

    fn frame() -> (PixelBuffer, ColorLayout) {
        let geometry = format().geometry;
        let mut buffer = geometry.new_buffer();
        buffer.set_pixel(0, 0, 0x00FF_0000);
        buffer.set_pixel(2, 1, 0x0000_00FF);
        (buffer, geometry.color_layout())
    }

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f-0001.png");
        let (buffer, layout) = frame();

        let mut sink = ImageSink::new(ImageFormat::Png, 90);
        sink.open(&path, &format()).unwrap();
        sink.write(&buffer, &layout, None).unwrap();
        sink.close().unwrap();

        let img = ::image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(2, 1).0, [0, 0, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_indexed_png_uses_palette() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.png");
        let mut buffer = PixelBuffer::zeroed(2, 1, 8, 4, ByteOrder::LsbFirst);
        buffer.set_pixel(1, 0, 1);
        let layout = ColorLayout::new(ChannelMasks::default(), 8, 8);

        let mut sink = ImageSink::new(ImageFormat::Png, 90);
        let table = sink.color_table(&[[10, 20, 30], [40, 50, 60]]).unwrap();
        sink.open(&path, &format()).unwrap();
        sink.write(&buffer, &layout, Some(&table)).unwrap();
        sink.close().unwrap();

        let img = ::image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(img.get_pixel(1, 0).0, [40, 50, 60]);
    }

    #[test]
    fn test_ppm_and_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let (buffer, layout) = frame();
        for (format_kind, name) in [(ImageFormat::Ppm, "f.ppm"), (ImageFormat::Jpeg, "f.jpg")] {
            let path = dir.path().join(name);
            let mut sink = ImageSink::new(format_kind, 90);
            assert!(sink.color_table(&[[0, 0, 0]]).is_none());
            sink.open(&path, &format()).unwrap();
            sink.write(&buffer, &layout, None).unwrap();
            sink.close().unwrap();
            let img = ::image::open(&path).unwrap();
            assert_eq!((img.width(), img.height()), (3, 2));
        }
        let ppm = std::fs::read(dir.path().join("f.ppm")).unwrap();
        assert!(ppm.starts_with(b"P6"));
    }

    #[test]
    fn test_close_without_frame_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        let mut sink = ImageSink::new(ImageFormat::Png, 90);
        sink.open(&path, &format()).unwrap();
        assert!(path.exists());
        sink.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_write_without_open_fails() {
        let (buffer, layout) = frame();
        let mut sink = ImageSink::new(ImageFormat::Png, 90);
        assert!(sink.write(&buffer, &layout, None).is_err());
    }

    #[test]
    fn test_open_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("f.png");
        let mut sink = ImageSink::new(ImageFormat::Png, 90);
        assert!(sink.open(&path, &format()).is_err());
    }
}
