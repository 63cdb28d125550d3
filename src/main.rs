//! RetroView application shell.
//!
//! Owns the window and wires the subsystems together: the render thread
//! gets the window's raw handles, the capture thread feeds it frames, and
//! keyboard input adjusts the CRT parameters live.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use retroview::capture::{list_devices, AudioPassthrough, VideoCapture};
use retroview::config::{self, AppConfig};
use retroview::error::ResultExt;
use retroview::{CrtParams, CrtRenderer, RetroError, RetroResult};

struct App {
    renderer: Arc<CrtRenderer>,
    capture: VideoCapture,
    audio: AudioPassthrough,
    // Declared last so the surface is gone before the window drops.
    window: Option<Window>,
}

impl App {
    fn new() -> Self {
        Self {
            renderer: Arc::new(CrtRenderer::new()),
            capture: VideoCapture::new(),
            audio: AudioPassthrough::new(),
            window: None,
        }
    }

    fn start_subsystems(&mut self, event_loop: &ActiveEventLoop) -> RetroResult<()> {
        let (width, height) = config::window_size();
        let attrs = Window::default_attributes()
            .with_title("RetroView")
            .with_inner_size(LogicalSize::new(width as f64, height as f64));
        let window = event_loop
            .create_window(attrs)
            .context("window creation failed")?;

        let display = window.display_handle().context("no display handle")?.as_raw();
        let handle = window.window_handle().context("no window handle")?.as_raw();
        let size = window.inner_size();

        self.renderer
            .initialize(display, handle, size.width.max(1), size.height.max(1))?;
        self.renderer.start()?;

        // Keep the frame pump alive even if capture fails; the renderer
        // shows the fallback screen until a device comes through.
        if let Err(e) = self
            .capture
            .start(config::video_device(), Arc::clone(&self.renderer))
        {
            log::error!("[App] video capture failed to start: {}", e);
        }

        if config::audio_enabled() {
            self.audio.set_volume(config::volume());
            if let Err(e) = self.audio.start() {
                log::warn!("[App] audio passthrough unavailable: {}", e);
            }
        }

        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.capture.stop();
        self.audio.stop();
        self.renderer.dispose();
        self.window = None;
    }

    fn handle_key(&mut self, code: KeyCode, repeat: bool, event_loop: &ActiveEventLoop) {
        if code == KeyCode::Escape {
            self.shutdown();
            event_loop.exit();
            return;
        }

        let mut p = self.renderer.params();
        match code {
            KeyCode::Digit1 => log_step("brightness", step(&mut p.brightness, -0.05, -1.0, 1.0)),
            KeyCode::Digit2 => log_step("brightness", step(&mut p.brightness, 0.05, -1.0, 1.0)),
            KeyCode::Digit3 => log_step("contrast", step(&mut p.contrast, -0.05, 0.0, 3.0)),
            KeyCode::Digit4 => log_step("contrast", step(&mut p.contrast, 0.05, 0.0, 3.0)),
            KeyCode::Digit5 => log_step("saturation", step(&mut p.saturation, -0.05, 0.0, 3.0)),
            KeyCode::Digit6 => log_step("saturation", step(&mut p.saturation, 0.05, 0.0, 3.0)),
            KeyCode::Digit7 => log_step("gamma", step(&mut p.gamma, -0.05, 0.2, 3.0)),
            KeyCode::Digit8 => log_step("gamma", step(&mut p.gamma, 0.05, 0.2, 3.0)),
            KeyCode::BracketLeft => {
                log_step("scanlines", step(&mut p.scanline_strength, -0.05, 0.0, 1.0))
            }
            KeyCode::BracketRight => {
                log_step("scanlines", step(&mut p.scanline_strength, 0.05, 0.0, 1.0))
            }
            KeyCode::Minus => {
                log_step("phosphor", step(&mut p.phosphor_strength, -0.05, 0.0, 1.0))
            }
            KeyCode::Equal => log_step("phosphor", step(&mut p.phosphor_strength, 0.05, 0.0, 1.0)),
            KeyCode::Comma => log_step("beam width", step(&mut p.beam_width, -0.02, 0.02, 1.0)),
            KeyCode::Period => log_step("beam width", step(&mut p.beam_width, 0.02, 0.02, 1.0)),
            KeyCode::ArrowLeft => log_step("h size", step(&mut p.h_size, -0.01, 0.8, 1.3)),
            KeyCode::ArrowRight => log_step("h size", step(&mut p.h_size, 0.01, 0.8, 1.3)),
            KeyCode::ArrowDown => log_step("v size", step(&mut p.v_size, -0.01, 0.8, 1.3)),
            KeyCode::ArrowUp => log_step("v size", step(&mut p.v_size, 0.01, 0.8, 1.3)),
            KeyCode::KeyM if !repeat => {
                p.mask_type = if p.mask_type >= 1.5 { 0.0 } else { p.mask_type + 1.0 };
                log::info!("[App] mask: {}", mask_name(p.mask_type));
            }
            KeyCode::KeyR if !repeat => {
                p = CrtParams::default();
                log::info!("[App] parameters reset to defaults");
            }
            KeyCode::KeyV if !repeat => {
                self.renderer.reset_video();
                return;
            }
            _ => return,
        }
        self.renderer.set_params(p);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.start_subsystems(event_loop) {
            log::error!("[App] startup failed: {}", e);
            self.shutdown();
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.renderer.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        self.handle_key(code, event.repeat, event_loop);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // Rendering runs on its own thread; the event loop only has to
        // service input and resizes.
        event_loop.set_control_flow(ControlFlow::Wait);
    }
}

fn step(value: &mut f32, delta: f32, min: f32, max: f32) -> f32 {
    *value = (*value + delta).clamp(min, max);
    *value
}

fn log_step(name: &str, value: f32) {
    log::info!("[App] {}: {:.2}", name, value);
}

fn mask_name(mask_type: f32) -> &'static str {
    if mask_type >= 1.5 {
        "shadow mask"
    } else if mask_type >= 0.5 {
        "aperture grille"
    } else {
        "off"
    }
}

fn parse_args() -> RetroResult<Option<AppConfig>> {
    let mut config = AppConfig::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--device" => config.video_device = parse_value(&mut args, "--device")?,
            "--width" => config.window_width = parse_value(&mut args, "--width")?,
            "--height" => config.window_height = parse_value(&mut args, "--height")?,
            "--volume" => config.volume = parse_value(&mut args, "--volume")?,
            "--no-audio" => config.audio_enabled = false,
            "--list-devices" => {
                print_devices()?;
                return Ok(None);
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            other => {
                return Err(RetroError::Config(format!("unknown argument: {}", other)));
            }
        }
    }
    Ok(Some(config))
}

fn parse_value<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> RetroResult<T> {
    let raw = args
        .next()
        .ok_or_else(|| RetroError::Config(format!("{} needs a value", flag)))?;
    raw.parse()
        .map_err(|_| RetroError::Config(format!("invalid value for {}: {}", flag, raw)))
}

fn print_devices() -> RetroResult<()> {
    let devices = list_devices()?;
    if devices.is_empty() {
        println!("no video devices found");
        return Ok(());
    }
    for device in devices {
        if device.description.is_empty() {
            println!("{}: {}", device.index, device.name);
        } else {
            println!("{}: {} ({})", device.index, device.name, device.description);
        }
    }
    Ok(())
}

fn print_usage() {
    println!("RetroView: live analog-video viewer with CRT emulation");
    println!();
    println!("Usage: retroview [options]");
    println!("  --device <n>     capture device index (default 0)");
    println!("  --width <px>     initial window width (default 960)");
    println!("  --height <px>    initial window height (default 720)");
    println!("  --volume <0..1>  audio passthrough gain (default 1.0)");
    println!("  --no-audio       disable audio passthrough");
    println!("  --list-devices   print capture devices and exit");
    println!();
    println!("Keys: 1/2 brightness, 3/4 contrast, 5/6 saturation, 7/8 gamma,");
    println!("      [/] scanlines, -/= phosphor, ,/. beam width, arrows h/v size,");
    println!("      M mask, R reset parameters, V reset video, Esc quit");
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match parse_args() {
        Ok(Some(config)) => config,
        Ok(None) => return,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            std::process::exit(2);
        }
    };
    config::set_config(config);

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("[App] event loop creation failed: {}", e);
            std::process::exit(1);
        }
    };

    let mut app = App::new();
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("[App] event loop terminated with error: {}", e);
        std::process::exit(1);
    }
}
