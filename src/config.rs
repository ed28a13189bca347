//! Configuration persistence for snapreel settings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::capture::Rect;
use crate::cursor::CursorMode;
use crate::error::CaptureError;

/// Video container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Container {
    #[default]
    Mp4,
    Webm,
    Mkv,
}

impl Container {
    /// Get file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
            Container::Mkv => "mkv",
        }
    }

    /// Get GStreamer muxer element name
    pub fn muxer_element(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4mux",
            Container::Webm => "webmmux",
            Container::Mkv => "matroskamux",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" => Some(Container::Mp4),
            "webm" => Some(Container::Webm),
            "mkv" => Some(Container::Mkv),
            _ => None,
        }
    }
}

/// Single-image file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Ppm,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "ppm" | "pnm" => Some(ImageFormat::Ppm),
            _ => None,
        }
    }
}

/// What the output template's extension asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Image(ImageFormat),
    Video(Container),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counter {
    width: usize,
    zero_pad: bool,
}

/// Output path with at most one printf-style counter (`%d`, `%04d`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    prefix: String,
    counter: Option<Counter>,
    suffix: String,
}

impl OutputTemplate {
    pub fn parse(template: &str) -> std::result::Result<Self, CaptureError> {
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut counter = None;
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            let out = if counter.is_some() {
                &mut suffix
            } else {
                &mut prefix
            };
            if c != '%' {
                out.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                out.push('%');
                continue;
            }

            let mut digits = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            if chars.next() != Some('d') {
                return Err(CaptureError::Config(format!(
                    "output template '{}': only %d counters are supported",
                    template
                )));
            }
            if counter.is_some() {
                return Err(CaptureError::Config(format!(
                    "output template '{}' has more than one counter",
                    template
                )));
            }
            counter = Some(Counter {
                width: digits.parse().unwrap_or(0),
                zero_pad: digits.starts_with('0'),
            });
        }

        Ok(Self {
            prefix,
            counter,
            suffix,
        })
    }

    pub fn has_counter(&self) -> bool {
        self.counter.is_some()
    }

    pub fn expand(&self, n: u64) -> PathBuf {
        let number = match self.counter {
            None => String::new(),
            Some(Counter {
                width,
                zero_pad: true,
            }) => format!("{:0width$}", n, width = width),
            Some(Counter { width, .. }) => format!("{:width$}", n, width = width),
        };
        PathBuf::from(format!("{}{}{}", self.prefix, number, self.suffix))
    }

    /// Lower-cased extension of the file name.
    pub fn extension(&self) -> Option<String> {
        self.expand(0)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    pub fn kind(&self) -> Option<OutputKind> {
        let ext = self.extension()?;
        ImageFormat::from_extension(&ext)
            .map(OutputKind::Image)
            .or_else(|| Container::from_extension(&ext).map(OutputKind::Video))
    }

    /// Insert `-%04d` before the extension, unless a counter exists.
    pub fn with_counter_suffix(&self) -> Self {
        if self.has_counter() {
            return self.clone();
        }
        let name_start = self.prefix.rfind('/').map_or(0, |i| i + 1);
        let (stem, ext) = match self.prefix[name_start..].rfind('.') {
            Some(dot) if dot > 0 => self.prefix.split_at(name_start + dot),
            _ => (self.prefix.as_str(), ""),
        };
        Self {
            prefix: format!("{}-", stem),
            counter: Some(Counter {
                width: 4,
                zero_pad: true,
            }),
            suffix: ext.to_string(),
        }
    }
}

/// Recorder configuration persisted between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// X display to capture (None = $DISPLAY)
    #[serde(default)]
    pub display: Option<String>,
    /// Capture rectangle (None = whole screen)
    #[serde(default)]
    pub area: Option<Rect>,
    /// Target frames per second
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Frame budget per segment (0 = unbounded)
    #[serde(default)]
    pub max_frames: u64,
    /// Time budget per segment in seconds, used when max_frames is 0
    #[serde(default)]
    pub max_time_secs: f64,
    /// Number of the first frame in each segment
    #[serde(default)]
    pub start_number: u64,
    /// Frame number increment per capture
    #[serde(default = "default_step")]
    pub step: u64,
    /// Start the next segment as soon as one fills its budget
    #[serde(default)]
    pub auto_continue: bool,
    /// Pointer compositing
    #[serde(default)]
    pub cursor: CursorMode,
    /// Capture through MIT-SHM rather than GetImage round trips
    #[serde(default = "default_use_shm")]
    pub use_shm: bool,
    /// Output path template
    #[serde(default = "default_output")]
    pub output: String,
    /// GStreamer encoder element (None = auto-detect hardware encoder)
    #[serde(default)]
    pub video_encoder: Option<String>,
    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_fps() -> f64 {
    10.0
}

fn default_step() -> u64 {
    1
}

fn default_use_shm() -> bool {
    true
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_output() -> String {
    let dir = dirs::video_dir().unwrap_or_else(|| PathBuf::from("."));
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("snapreel-{}-%04d.png", stamp))
        .to_string_lossy()
        .into_owned()
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            display: None,
            area: None,
            fps: default_fps(),
            max_frames: 0,
            max_time_secs: 0.0,
            start_number: 0,
            step: default_step(),
            auto_continue: false,
            cursor: CursorMode::default(),
            use_shm: default_use_shm(),
            output: default_output(),
            video_encoder: None,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl RecorderConfig {
    /// `$XDG_CONFIG_HOME/snapreel/config.json`
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("snapreel").join("config.json"))
    }

    /// Load configuration from disk, or return defaults if unavailable
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            log::warn!("No config directory, using defaults");
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(err) => {
                log::warn!("Error loading config, using defaults: {:#}", err);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(Some(config))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path().context("No config directory")?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Milliseconds between frames, at least 1.
    pub fn interval_ms(&self) -> u64 {
        (1000.0 / self.fps).round().max(1.0) as u64
    }

    /// Frame budget per segment (0 = unbounded).
    pub fn frame_budget(&self) -> u64 {
        if self.max_frames > 0 {
            self.max_frames
        } else if self.max_time_secs > 0.0 {
            (self.max_time_secs * 1000.0 / self.interval_ms() as f64).ceil() as u64
        } else {
            0
        }
    }

    /// The output template, with a segment counter added when rollover
    /// would otherwise overwrite the previous segment.
    pub fn output_template(&self) -> std::result::Result<OutputTemplate, CaptureError> {
        let template = OutputTemplate::parse(&self.output)?;
        match template.kind() {
            Some(OutputKind::Video(_)) if self.auto_continue => Ok(template.with_counter_suffix()),
            _ => Ok(template),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), CaptureError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(CaptureError::Config(format!("fps must be positive, got {}", self.fps)));
        }
        if self.step == 0 {
            return Err(CaptureError::Config("step must be at least 1".into()));
        }
        if self.area.is_some_and(|a| a.is_empty()) {
            return Err(CaptureError::Config("capture area is empty".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(CaptureError::Config(format!(
                "jpeg quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        let template = self.output_template()?;
        match template.kind() {
            None => Err(CaptureError::Config(format!(
                "no writer for output '{}'; use .png, .jpg, .ppm, .mp4, .webm or .mkv",
                self.output
            ))),
            Some(OutputKind::Image(_)) if !template.has_counter() => Err(CaptureError::Config(
                format!("output '{}' needs a frame number such as %04d", self.output),
            )),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_counter_forms() {
        let t = OutputTemplate::parse("/tmp/shot-%04d.png").unwrap();
        assert!(t.has_counter());
        assert_eq!(t.expand(7), PathBuf::from("/tmp/shot-0007.png"));
        assert_eq!(t.expand(12345), PathBuf::from("/tmp/shot-12345.png"));

        let t = OutputTemplate::parse("f%d.ppm").unwrap();
        assert_eq!(t.expand(42), PathBuf::from("f42.ppm"));

        let t = OutputTemplate::parse("100%%-%3d.jpg").unwrap();
        assert_eq!(t.expand(5), PathBuf::from("100%-  5.jpg"));
    }

    #[test]
    fn test_template_rejects_bad_placeholders() {
        assert!(OutputTemplate::parse("a-%s.png").is_err());
        assert!(OutputTemplate::parse("a-%d-%d.png").is_err());
        assert!(OutputTemplate::parse("a-%").is_err());
    }

    #[test]
    fn test_template_kind() {
        let kind = |s: &str| OutputTemplate::parse(s).unwrap().kind();
        assert_eq!(kind("x-%d.PNG"), Some(OutputKind::Image(ImageFormat::Png)));
        assert_eq!(kind("x.webm"), Some(OutputKind::Video(Container::Webm)));
        assert_eq!(kind("x.gif"), None);
        assert_eq!(kind("noext"), None);
    }

    #[test]
    fn test_with_counter_suffix() {
        let t = OutputTemplate::parse("/v.d/movie.mp4").unwrap().with_counter_suffix();
        assert_eq!(t.expand(3), PathBuf::from("/v.d/movie-0003.mp4"));

        let t = OutputTemplate::parse("/v.d/movie").unwrap().with_counter_suffix();
        assert_eq!(t.expand(3), PathBuf::from("/v.d/movie-0003"));

        let t = OutputTemplate::parse("m-%02d.mkv").unwrap();
        assert_eq!(t.with_counter_suffix(), t);
    }

    #[test]
    fn test_budget_and_interval() {
        let config = RecorderConfig {
            fps: 25.0,
            max_time_secs: 2.0,
            ..Default::default()
        };
        assert_eq!(config.interval_ms(), 40);
        assert_eq!(config.frame_budget(), 50);

        let config = RecorderConfig {
            max_frames: 5,
            max_time_secs: 100.0,
            ..Default::default()
        };
        assert_eq!(config.frame_budget(), 5);
        assert_eq!(RecorderConfig::default().frame_budget(), 0);
    }

    #[test]
    fn test_validate() {
        assert!(RecorderConfig::default().validate().is_ok());
        let bad = [
            RecorderConfig {
                fps: 0.0,
                ..Default::default()
            },
            RecorderConfig {
                step: 0,
                ..Default::default()
            },
            RecorderConfig {
                output: "shot.png".into(),
                ..Default::default()
            },
            RecorderConfig {
                output: "clip.avi".into(),
                ..Default::default()
            },
            RecorderConfig {
                area: Some(Rect::new(0, 0, 0, 10)),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_auto_continue_adds_segment_counter() {
        let config = RecorderConfig {
            output: "clip.mp4".into(),
            auto_continue: true,
            ..Default::default()
        };
        let template = config.output_template().unwrap();
        assert_eq!(template.expand(1), PathBuf::from("clip-0001.mp4"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = RecorderConfig {
            fps: 30.0,
            area: Some(Rect::new(1, 2, 3, 4)),
            cursor: CursorMode::Synthetic,
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(RecorderConfig::load_from(&path).unwrap(), Some(config));
        assert_eq!(
            RecorderConfig::load_from(&dir.path().join("missing.json")).unwrap(),
            None
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RecorderConfig = serde_json::from_str(r#"{ "fps": 5.0, "cursor": "none" }"#).unwrap();
        assert_eq!(config.fps, 5.0);
        assert_eq!(config.step, 1);
        assert!(config.use_shm);
        assert_eq!(config.cursor, CursorMode::None);
    }
}
