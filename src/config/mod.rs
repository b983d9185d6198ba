//! Configuration for the presenter
//!
//! Every toggle is an explicit field, loadable from a TOML file and passed
//! at construction; nothing is read from environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Presenter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresentConfig {
    /// Path of the DRM device node to open
    #[serde(default = "PresentConfig::default_device_path")]
    pub device_path: String,

    /// Number of buffers in each output's swap ring (minimum 2)
    #[serde(default = "PresentConfig::default_buffer_count")]
    pub buffer_count: usize,

    /// Paint the frame-time bar and dropped-frame indicator into each frame
    #[serde(default)]
    pub show_dropped_frames: bool,

    /// Clear the whole back buffer to white before compositing
    #[serde(default)]
    pub clear_frames: bool,

    /// Delay applied after each completed flip wait, in microseconds.
    ///
    /// Workaround for flips not always executing properly on some drivers;
    /// root cause undiagnosed. Zero disables it.
    #[serde(default = "PresentConfig::default_post_flip_delay_us")]
    pub post_flip_delay_us: u64,

    /// Nominal display refresh rate used to scale the frame-time bar
    #[serde(default = "PresentConfig::default_nominal_refresh_hz")]
    pub nominal_refresh_hz: f64,
}

impl PresentConfig {
    fn default_device_path() -> String {
        "/dev/dri/card0".to_string()
    }

    fn default_buffer_count() -> usize {
        3
    }

    fn default_post_flip_delay_us() -> u64 {
        1000
    }

    fn default_nominal_refresh_hz() -> f64 {
        60.0
    }

    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: PresentConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count < 2 {
            anyhow::bail!("buffer_count must be at least 2, got {}", self.buffer_count);
        }
        if self.nominal_refresh_hz <= 0.0 {
            anyhow::bail!(
                "nominal_refresh_hz must be positive, got {}",
                self.nominal_refresh_hz
            );
        }
        Ok(())
    }

    /// Duration of one frame at the nominal refresh rate.
    pub fn nominal_frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.nominal_refresh_hz)
    }

    /// The post-flip delay as a [`Duration`].
    pub fn post_flip_delay(&self) -> Duration {
        Duration::from_micros(self.post_flip_delay_us)
    }
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            device_path: Self::default_device_path(),
            buffer_count: Self::default_buffer_count(),
            show_dropped_frames: false,
            clear_frames: false,
            post_flip_delay_us: Self::default_post_flip_delay_us(),
            nominal_refresh_hz: Self::default_nominal_refresh_hz(),
        }
    }
}

#[cfg(test)]
mod tests;
