use std::io::{BufRead, IsTerminal};

use anyhow::Result;
use clap::Parser;

use snapreel::capture::Rect;
use snapreel::config::RecorderConfig;
use snapreel::cursor::CursorMode;
use snapreel::screencast::{Controller, Recorder};
use snapreel::sink::encoder::detect_encoders;

#[derive(Parser)]
#[command(name = "snapreel")]
#[command(about = "Record the X11 screen to numbered images or a video file")]
#[command(version)]
struct Cli {
    /// Output template, e.g. shots/frame-%04d.png or clip.mp4
    #[arg(short, long)]
    output: Option<String>,

    /// X display to capture (default: $DISPLAY)
    #[arg(long)]
    display: Option<String>,

    /// Capture area as WxH+X+Y or x,y,w,h (default: whole screen)
    #[arg(short, long)]
    area: Option<Rect>,

    /// Target frames per second
    #[arg(short, long)]
    fps: Option<f64>,

    /// Frames per segment (0 = unbounded)
    #[arg(short = 'n', long)]
    max_frames: Option<u64>,

    /// Seconds per segment, used when --max-frames is 0
    #[arg(short = 't', long)]
    max_time: Option<f64>,

    /// Number of the first frame
    #[arg(long)]
    start_number: Option<u64>,

    /// Frame number increment per capture
    #[arg(long)]
    step: Option<u64>,

    /// Start a new segment whenever one fills its budget
    #[arg(long)]
    auto_continue: bool,

    /// Pointer compositing: none, synthetic or real
    #[arg(long)]
    cursor: Option<CursorMode>,

    /// Capture with GetImage instead of MIT-SHM
    #[arg(long)]
    no_shm: bool,

    /// GStreamer encoder element for video output
    #[arg(long)]
    encoder: Option<String>,

    /// JPEG quality (1-100)
    #[arg(long)]
    quality: Option<u8>,

    /// Start paused; press p to begin
    #[arg(long)]
    paused: bool,

    /// Store the effective settings as the new defaults
    #[arg(long)]
    save_config: bool,

    /// List the video encoders GStreamer offers and exit
    #[arg(long)]
    list_encoders: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut RecorderConfig) {
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if self.display.is_some() {
            config.display = self.display.clone();
        }
        if self.area.is_some() {
            config.area = self.area;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
        if let Some(max_time) = self.max_time {
            config.max_time_secs = max_time;
        }
        if let Some(start) = self.start_number {
            config.start_number = start;
        }
        if let Some(step) = self.step {
            config.step = step;
        }
        if self.auto_continue {
            config.auto_continue = true;
        }
        if let Some(cursor) = self.cursor {
            config.cursor = cursor;
        }
        if self.no_shm {
            config.use_shm = false;
        }
        if self.encoder.is_some() {
            config.video_encoder = self.encoder.clone();
        }
        if let Some(quality) = self.quality {
            config.jpeg_quality = quality;
        }
    }
}

/// Single-letter commands on stdin: p pause/resume, s single step, q stop
fn spawn_stdin_control(controller: Controller) {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return;
    }
    eprintln!("Commands: p = pause/resume, s = single step, q = stop (followed by Enter)");
    std::thread::spawn(move || {
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim() {
                "p" => controller.toggle_pause(),
                "s" => controller.step(),
                "q" => {
                    controller.stop();
                    break;
                }
                "" => {}
                other => eprintln!("Unknown command '{}'", other),
            }
        }
    });
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if cli.list_encoders {
        for encoder in detect_encoders()? {
            println!("{:<16} {}", encoder.gst_element, encoder.display_name());
        }
        return Ok(());
    }

    let mut config = RecorderConfig::load();
    cli.apply(&mut config);
    config.validate()?;

    if cli.save_config {
        let path = config.save()?;
        log::info!("Saved settings to {}", path.display());
    }

    let mut recorder = Recorder::from_config(&config)?;
    let controller = recorder.controller();
    controller.start();
    if cli.paused {
        controller.pause();
    }
    spawn_stdin_control(controller);

    let progress = recorder.progress();
    let result = recorder.run();
    log::info!(
        "{} frames written, {} dropped, {} deadlines missed",
        progress.captured(),
        progress.dropped(),
        progress.missed()
    );
    result?;
    Ok(())
}
