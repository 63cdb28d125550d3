//! Runtime configuration shared across subsystems.
//!
//! Populated once by the binary from command-line flags, then read by the
//! capture and audio threads. Values are validated on every store so readers
//! never see an out-of-range setting.

use lazy_static::lazy_static;
use parking_lot::RwLock;

const MIN_WINDOW_WIDTH: u32 = 320;
const MIN_WINDOW_HEIGHT: u32 = 240;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Index into the enumerated capture devices.
    pub video_device: u32,
    /// Run the audio passthrough alongside video.
    pub audio_enabled: bool,
    /// Playback gain, 0.0 to 1.0.
    pub volume: f32,
    /// Initial window size in logical pixels.
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            video_device: 0,
            audio_enabled: true,
            volume: 1.0,
            window_width: 960,
            window_height: 720,
        }
    }
}

impl AppConfig {
    /// Clamp out-of-range values in place.
    pub fn validate(&mut self) {
        if !(0.0..=1.0).contains(&self.volume) {
            let clamped = self.volume.clamp(0.0, 1.0);
            log::debug!("[Config] volume {} clamped to {}", self.volume, clamped);
            self.volume = clamped;
        }
        if self.window_width < MIN_WINDOW_WIDTH {
            log::debug!(
                "[Config] window width {} raised to {}",
                self.window_width,
                MIN_WINDOW_WIDTH
            );
            self.window_width = MIN_WINDOW_WIDTH;
        }
        if self.window_height < MIN_WINDOW_HEIGHT {
            log::debug!(
                "[Config] window height {} raised to {}",
                self.window_height,
                MIN_WINDOW_HEIGHT
            );
            self.window_height = MIN_WINDOW_HEIGHT;
        }
    }
}

lazy_static! {
    pub static ref APP_CONFIG: RwLock<AppConfig> = RwLock::new(AppConfig::default());
}

/// Validate and store a new configuration.
pub fn set_config(config: AppConfig) {
    let mut config = config;
    config.validate();
    *APP_CONFIG.write() = config;
}

/// Snapshot of the current configuration.
pub fn current() -> AppConfig {
    APP_CONFIG.read().clone()
}

pub fn video_device() -> u32 {
    APP_CONFIG.read().video_device
}

pub fn audio_enabled() -> bool {
    APP_CONFIG.read().audio_enabled
}

pub fn volume() -> f32 {
    APP_CONFIG.read().volume
}

pub fn window_size() -> (u32, u32) {
    let config = APP_CONFIG.read();
    (config.window_width, config.window_height)
}
