//! # kmsflip - Triple-Buffered KMS Presenter
//!
//! Presents a software-rendered window stack on every connected display via
//! DRM/KMS dumb buffers: legacy mode setting, per-output swap rings,
//! vblank-synchronized page flips and differential redraw.
//!
//! The binary runs a bouncing-rectangle demo scene until interrupted, then
//! restores the displays to their previous mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use kmsflip::{
    BackingView, Compositor, DisplayManager, DrmDevice, FrameScheduler, PresentConfig, Rect,
    Window,
};

#[derive(Parser)]
#[command(name = "kmsflip")]
#[command(about = "Triple-buffered software presenter over DRM/KMS dumb buffers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/kmsflip/kmsflip.toml")]
    config: String,

    /// DRM device node to open (overrides the config file)
    #[arg(short, long)]
    device: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Paint the frame-time bar and dropped-frame indicator
    #[arg(long)]
    show_dropped_frames: bool,

    /// Clear each back buffer to white before compositing
    #[arg(long)]
    clear_frames: bool,

    /// Post-flip delay in microseconds (overrides the config file)
    #[arg(long)]
    post_flip_delay_us: Option<u64>,
}

/// Demo content: a solid rectangle bouncing off the screen edges.
struct BouncingBox {
    geometry: Rect,
    velocity: (i32, i32),
    bounds: (u32, u32),
    pixels: Vec<u32>,
}

impl BouncingBox {
    fn new(screen_width: u32, screen_height: u32, size: u32, color: u32) -> Self {
        Self {
            geometry: Rect::new(0, 0, size, size),
            velocity: (4, 3),
            bounds: (screen_width, screen_height),
            pixels: vec![color; (size * size) as usize],
        }
    }

    /// Moves one step and returns the area needing repaint (old ∪ new
    /// position).
    fn step(&mut self) -> Rect {
        let old = self.geometry;

        let mut x = self.geometry.x + self.velocity.0;
        let mut y = self.geometry.y + self.velocity.1;
        let max_x = self.bounds.0 as i32 - self.geometry.width as i32;
        let max_y = self.bounds.1 as i32 - self.geometry.height as i32;

        if x < 0 || x > max_x {
            self.velocity.0 = -self.velocity.0;
            x = x.clamp(0, max_x);
        }
        if y < 0 || y > max_y {
            self.velocity.1 = -self.velocity.1;
            y = y.clamp(0, max_y);
        }

        self.geometry.x = x;
        self.geometry.y = y;
        old.union(&self.geometry)
    }
}

impl Window for BouncingBox {
    fn is_visible(&self) -> bool {
        true
    }

    fn geometry(&self) -> Rect {
        self.geometry
    }

    fn acquire_backing(&mut self) -> Option<BackingView<'_>> {
        Some(BackingView {
            pixels: &self.pixels,
            width: self.geometry.width,
            height: self.geometry.height,
            stride: self.geometry.width as usize,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    info!("🚀 Starting kmsflip v{}", kmsflip::VERSION);

    // Load configuration, falling back to defaults when the file is absent
    let config_path = shellexpand_home(&cli.config);
    let mut config = match PresentConfig::load(&config_path) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", config_path);
            config
        }
        Err(e) => {
            warn!("Config not loaded ({}), using defaults", e);
            PresentConfig::default()
        }
    };

    // Override config with CLI flags
    if let Some(device) = cli.device {
        config.device_path = device;
    }
    if cli.show_dropped_frames {
        config.show_dropped_frames = true;
    }
    if cli.clear_frames {
        config.clear_frames = true;
    }
    if let Some(us) = cli.post_flip_delay_us {
        config.post_flip_delay_us = us;
    }
    config.validate()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("Failed to install signal handler")?;
    }

    let device = DrmDevice::open(&config.device_path)
        .with_context(|| format!("Failed to open DRM device {}", config.device_path))?;
    let mut manager = DisplayManager::open(device, config.buffer_count)?;
    if manager.output_count() == 0 {
        anyhow::bail!("No connected outputs found on {}", config.device_path);
    }
    manager.create_framebuffers()?;
    manager.set_mode();

    let mut scheduler = FrameScheduler::new(&config);
    let mut compositors: Vec<Compositor> = (0..manager.output_count())
        .map(|_| Compositor::new(config.clear_frames))
        .collect();
    let mut scenes: Vec<BouncingBox> = (0..manager.output_count())
        .map(|idx| {
            let mode = manager.output(idx).mode();
            BouncingBox::new(mode.width, mode.height, 120, 0x000080ff)
        })
        .collect();

    // First frame paints everything
    for (idx, compositor) in compositors.iter_mut().enumerate() {
        let mode = manager.output(idx).mode();
        compositor.add_repaint(Rect::new(0, 0, mode.width, mode.height));
    }

    info!("🖥️ Presenting on {} output(s)", manager.output_count());

    while running.load(Ordering::SeqCst) {
        for idx in 0..manager.output_count() {
            compositors[idx].add_repaint(scenes[idx].step());

            let painted =
                compositors[idx].redraw(manager.output_mut(idx), &mut [&mut scenes[idx]]);
            if painted.is_empty() {
                continue;
            }

            if let Err(e) = scheduler.swap_output(&mut manager, idx) {
                error!("Swap failed: {}", e);
            }
        }
    }

    info!("Shutting down, restoring display state");
    manager.close();
    Ok(())
}

/// Expands a leading `~/` to the home directory; no other expansion.
fn shellexpand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home, rest),
        _ => path.to_string(),
    }
}
