mod annotation;
mod controller;
mod display;
mod frame;
mod geometry;
mod input;
mod render;
mod video;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser};
use serde_json::json;
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use controller::{Controller, DEFAULT_TARGET_HEIGHT};
use display::{PngSurface, STATUS_HINT};
use input::InputEvent;
use render::{Compositor, OverlayStyle};
use video::{VideoError, VideoSource};

const EVENTS_HELP: &str = r##"Input commands (one per line, '#' starts a comment):
  n | next                          show the next frame
  r | reset                         clear annotations
  q | quit | exit                   exit
  click X Y [left|right|middle]     click at display coordinates

Every fourth left click closes a quadrilateral; it stays on screen across
frames until reset or replaced by the next four clicks."##;

#[derive(Parser, Debug)]
#[command(
    name = "video-quad-label",
    version,
    about = "Step through a video frame by frame and mark a quadrilateral with four clicks",
    after_help = EVENTS_HELP
)]
struct Cli {
    /// Path to the video file (or a directory of frame images)
    #[arg(short = 'v', long, default_value = "./test.mp4")]
    video_path: PathBuf,
    /// Display height frames are resized to
    #[arg(long, default_value_t = DEFAULT_TARGET_HEIGHT)]
    target_height: u32,
    /// Scheduler interval in milliseconds
    #[arg(long, default_value_t = 30)]
    tick_ms: u64,
    /// Input command file (or - for stdin)
    #[arg(long, default_value = "-")]
    events: String,
    /// PNG rewritten with the current display frame (default: <out_root>/display.png)
    #[arg(long)]
    display_out: Option<PathBuf>,
    /// Print each placed point as a JSON line on stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("video_quad_label=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let Some(source) = open_video(&cli.video_path) else {
        return Ok(());
    };

    let display_path = cli
        .display_out
        .clone()
        .unwrap_or_else(|| out_root().join("display.png"));
    let surface = PngSurface::new(display_path);
    info!("display frames go to {}", abs_path(surface.path()).display());
    info!("{STATUS_HINT}");

    let mut controller = Controller::new(
        source,
        Box::new(surface),
        Compositor::new(OverlayStyle::default()),
        cli.target_height.max(1),
    );
    controller.status_hint()?;
    if cli.json {
        controller.on_point(|added| {
            let mut payload = serde_json::to_value(added).unwrap_or_else(|_| json!({}));
            payload["at"] = json!(timestamp_iso());
            println!("{payload}");
        });
    }

    let events = spawn_input(&cli.events)?;
    run_loop(&mut controller, &events, Duration::from_millis(cli.tick_ms.max(1)))
}

/// Opens the video or prints the user-facing failure line. The reason only goes
/// to the log; an unopenable video is not a runtime error.
fn open_video(path: &Path) -> Option<Box<dyn VideoSource>> {
    let opened = if video::is_valid_video(path) {
        video::open_source(path)
    } else {
        Err(VideoError::Open {
            path: abs_path(path),
            reason: "not a readable video".to_string(),
        })
    };
    match opened {
        Ok(source) => Some(source),
        Err(err) => {
            println!("Error: Unable to open video file.");
            warn!("{err}");
            None
        }
    }
}

fn spawn_input(source: &str) -> Result<Receiver<InputEvent>> {
    let (tx, rx) = mpsc::channel();
    if source == "-" {
        thread::spawn(move || input::pump_events(io::stdin().lock(), tx));
    } else {
        let file =
            File::open(source).with_context(|| format!("failed to open events file: {source}"))?;
        thread::spawn(move || input::pump_events(BufReader::new(file), tx));
    }
    Ok(rx)
}

/// Single-threaded scheduler: route pending input, tick, sleep. An advance
/// command ends the current batch so each one gets its own tick.
fn run_loop(
    controller: &mut Controller,
    events: &Receiver<InputEvent>,
    interval: Duration,
) -> Result<()> {
    let mut input_done = false;
    loop {
        loop {
            match events.try_recv() {
                Ok(event) => {
                    input::route(controller, event)?;
                    if controller.is_closed() || controller.advance_requested() {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    input_done = true;
                    break;
                }
            }
        }

        controller.tick()?;
        if controller.is_closed() {
            break;
        }
        if input_done {
            info!("input ended ({:?})", controller.state());
            controller.close();
            break;
        }
        thread::sleep(interval);
    }
    if let Some(frame) = controller.original() {
        info!("last frame shown at {}x{}", frame.width(), frame.height());
    }
    if let Some(quad) = controller.annotations().committed().first() {
        info!("final quadrilateral (source space): {:?}", quad.source);
    }
    info!("closed after {} frames", controller.frame_counter());
    Ok(())
}

fn out_root() -> PathBuf {
    env::var("VQL_OUT_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".video-quad-label"))
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}
