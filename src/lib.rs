//! RetroView: live analog-video viewer with CRT emulation.
//!
//! Frames captured from a video device flow through a single-slot mailbox
//! into a dedicated render thread, which uploads them to the GPU, scales
//! them by the largest integer factor that fits the window, and draws the
//! result through a CRT shader (scanlines, phosphor mask, beam shaping,
//! color controls). Audio from the default input device is passed through
//! to the default output device on its own streams.

pub mod capture;
pub mod config;
pub mod error;
pub mod rendering;

pub use error::{RetroError, RetroResult};
pub use rendering::{CrtParams, CrtRenderer, ShaderAssets};
