//! # kmsflip - Triple-Buffered KMS Presenter Library
//!
//! A software-rendered display presenter over DRM/KMS dumb buffers: legacy
//! mode setting, per-output swap rings with vblank-synchronized page flips,
//! differential redraw and dropped-frame accounting.
//!
//! ## Architecture
//!
//! kmsflip is built on a modular architecture:
//! - `device`: Display device capability trait with DRM and mock backends
//! - `display`: Device manager, outputs, swap rings and paint surfaces
//! - `compositor`: Differential redraw of a window stack into back buffers
//! - `scheduler`: The swap protocol, flip completion waits and diagnostics
//! - `region`: Dirty-region arithmetic
//! - `config`: Configuration parsing and validation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kmsflip::{DisplayManager, DrmDevice, FrameScheduler, PresentConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = PresentConfig::default();
//!     let device = DrmDevice::open(&config.device_path)?;
//!     let mut manager = DisplayManager::open(device, config.buffer_count)?;
//!     manager.create_framebuffers()?;
//!     manager.set_mode();
//!     let mut scheduler = FrameScheduler::new(&config);
//!     // paint, then: scheduler.swap_output(&mut manager, 0)?;
//!     Ok(())
//! }
//! ```

pub mod compositor;
pub mod config;
pub mod device;
pub mod display;
pub mod region;
pub mod scheduler;

// Re-export main types for easy access
pub use compositor::{BackingView, Compositor, Window};
pub use config::PresentConfig;
pub use device::{DeviceError, DisplayDevice, DrmDevice, FlipEvent, Mode, MockDevice, OutputId};
pub use display::{DisplayManager, Framebuffer, Output, Surface};
pub use region::{Rect, Region};
pub use scheduler::FrameScheduler;

/// Crate version, from the build metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
