//! Audio passthrough: capture input straight to the default output.
//!
//! Runs independently of the video path with no synchronization between
//! the two. Samples cross from the input callback to the output callback
//! through a bounded channel; when the output falls behind, incoming
//! samples are dropped rather than ever blocking the device callback.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{RetroError, RetroResult};

/// Bounded channel size: roughly 100 ms of samples.
fn channel_capacity(sample_rate: u32, channels: u16) -> usize {
    ((sample_rate as usize * channels as usize) / 10).max(1024)
}

/// Live input-to-output audio path with a volume control.
///
/// The output stream is opened with the input's configuration, so the
/// passthrough stays a plain sample copy. Streams are not `Send`; this
/// type lives on the thread that started it.
pub struct AudioPassthrough {
    input: Option<Stream>,
    output: Option<Stream>,
    volume_bits: Arc<AtomicU32>,
}

impl AudioPassthrough {
    pub fn new() -> Self {
        Self {
            input: None,
            output: None,
            volume_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    /// Open both streams and start playing. A failure on either side
    /// leaves the passthrough stopped; video is unaffected.
    pub fn start(&mut self) -> RetroResult<()> {
        if self.input.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or_else(|| RetroError::Audio("no default input device".to_string()))?;
        let output_device = host
            .default_output_device()
            .ok_or_else(|| RetroError::Audio("no default output device".to_string()))?;

        let supported = input_device
            .default_input_config()
            .map_err(|e| RetroError::Audio(format!("input config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let (tx, rx) = bounded::<f32>(channel_capacity(config.sample_rate, config.channels));

        let input = match sample_format {
            SampleFormat::F32 => build_input::<f32>(&input_device, &config, tx),
            SampleFormat::I16 => build_input::<i16>(&input_device, &config, tx),
            SampleFormat::U16 => build_input::<u16>(&input_device, &config, tx),
            other => {
                return Err(RetroError::Audio(format!(
                    "unsupported sample format: {:?}",
                    other
                )))
            }
        }?;

        let output = build_output::<f32>(&output_device, &config, rx, Arc::clone(&self.volume_bits))?;

        log::info!(
            "[Audio] passthrough running: {} Hz, {} channel(s), {:?} input",
            config.sample_rate,
            config.channels,
            sample_format
        );

        self.input = Some(input);
        self.output = Some(output);
        Ok(())
    }

    pub fn stop(&mut self) {
        let was_running = self.input.is_some() || self.output.is_some();
        if let Some(stream) = self.input.take() {
            let _ = stream.pause();
        }
        if let Some(stream) = self.output.take() {
            let _ = stream.pause();
        }
        if was_running {
            log::info!("[Audio] passthrough stopped");
        }
    }

    /// Playback gain. Takes effect on the next output callback.
    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.input.is_some()
    }
}

impl Default for AudioPassthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioPassthrough {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    tx: Sender<f32>,
) -> RetroResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    if tx.try_send(f32::from_sample(sample)).is_err() {
                        // Output is behind; drop the rest of the chunk.
                        break;
                    }
                }
            },
            |err| log::warn!("[Audio] input stream error: {}", err),
            None,
        )
        .map_err(|e| RetroError::Audio(format!("input stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| RetroError::Audio(format!("input start: {}", e)))?;
    Ok(stream)
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    rx: Receiver<f32>,
    volume_bits: Arc<AtomicU32>,
) -> RetroResult<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let volume = f32::from_bits(volume_bits.load(Ordering::Relaxed));
                for slot in data.iter_mut() {
                    *slot = match rx.try_recv() {
                        Ok(sample) => T::from_sample(sample * volume),
                        // Underrun plays silence.
                        Err(_) => T::EQUILIBRIUM,
                    };
                }
            },
            |err| log::warn!("[Audio] output stream error: {}", err),
            None,
        )
        .map_err(|e| RetroError::Audio(format!("output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| RetroError::Audio(format!("output start: {}", e)))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_capacity_tracks_format() {
        assert_eq!(channel_capacity(48000, 2), 9600);
        assert_eq!(channel_capacity(44100, 1), 4410);
        // Tiny formats still get a workable floor.
        assert_eq!(channel_capacity(8000, 1), 1024);
    }

    #[test]
    fn test_volume_round_trip() {
        let audio = AudioPassthrough::new();
        assert_eq!(audio.volume(), 1.0);
        audio.set_volume(0.25);
        assert_eq!(audio.volume(), 0.25);
        audio.set_volume(0.0);
        assert_eq!(audio.volume(), 0.0);
    }

    #[test]
    fn test_new_passthrough_is_stopped() {
        let mut audio = AudioPassthrough::new();
        assert!(!audio.is_running());
        audio.stop();
        assert!(!audio.is_running());
    }
}
