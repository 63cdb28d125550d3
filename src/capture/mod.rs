//! Device capture: camera video frames and microphone audio passthrough.

pub mod audio;
pub mod video;

pub use audio::AudioPassthrough;
pub use video::{list_devices, VideoCapture, VideoDevice};
