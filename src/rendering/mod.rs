//! GPU rendering core: CRT emulation with wgpu.
//!
//! ## Components
//! - `mailbox`: single-slot frame handoff between capture and render threads
//! - `params`: CRT tuning parameters and their GPU uniform layout
//! - `surface`: swapchain configuration and resize coalescing
//! - `uploader`: raw BGRA frames to GPU textures
//! - `pipeline`: the two-pass integer-scale + CRT shader pipeline
//! - `renderer`: the render thread and its public handle

pub mod mailbox;
pub mod params;
pub mod pipeline;
pub mod renderer;
pub mod surface;
pub mod uploader;

pub use mailbox::{FrameMailbox, RawFrame};
pub use params::CrtParams;
pub use pipeline::ShaderAssets;
pub use renderer::CrtRenderer;
