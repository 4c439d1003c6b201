//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! It owns the input stream lifecycle and delivers fixed-size chunks of mono
//! signed 16-bit PCM over a channel, in the order they were recorded.
//!
//! ## Features
//! - Named or default input device selection
//! - i16 and f32 device formats, converted to i16
//! - Multi-channel input downmixed to mono
//! - Re-chunking of device buffers into fixed-size chunks

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};
use crossbeam_channel::Sender;
use log::{error, info, warn};
use std::time::Instant;

use crate::config::CaptureConfig;

/// One fixed-size block of mono PCM, stamped when it was completed.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub samples: Vec<i16>,
    pub captured_at: Instant,
}

impl Chunk {
    pub fn new(samples: Vec<i16>, captured_at: Instant) -> Self {
        Self {
            samples,
            captured_at,
        }
    }
}

/// Lifecycle of a device that pushes [`Chunk`]s onto a channel.
///
/// `open` registers the channel; chunks flow between `start` and `stop`.
/// `close` releases the stream (a later `open` builds a new one) and
/// `terminate` releases the device itself.
pub trait CaptureSource {
    fn is_open(&self) -> bool;
    fn open(&mut self, chunks: Sender<Chunk>) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn terminate(&mut self) -> Result<()>;
}

/// Capture from a CPAL input device.
pub struct CpalSource {
    config: CaptureConfig,
    device: Option<cpal::Device>,
    stream: Option<cpal::Stream>,
}

impl CpalSource {
    /// Resolves the configured input device.
    ///
    /// An explicitly named device that does not exist is an error; with no
    /// name the host's default input device is used.
    ///
    /// # Arguments
    ///
    /// * `config` - Device name, sample rate and chunk size
    ///
    /// # Returns
    ///
    /// A closed source holding the device. No stream exists until `open`.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = match &config.device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("Input device `{}` not found", name))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?,
        };

        info!("Using audio input device: {}", device.name()?);

        Ok(Self {
            config,
            device: Some(device),
            stream: None,
        })
    }

    fn device(&self) -> Result<&cpal::Device> {
        self.device
            .as_ref()
            .ok_or_else(|| anyhow!("Capture source has been terminated"))
    }

    fn stream(&self) -> Result<&cpal::Stream> {
        self.stream
            .as_ref()
            .ok_or_else(|| anyhow!("Stream is not open"))
    }
}

impl CaptureSource for CpalSource {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self, chunks: Sender<Chunk>) -> Result<()> {
        info!("Opening stream...");
        let device = self.device()?;
        let rate = self.config.sample_rate;

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported = find_supported_config(configs, rate)
            .ok_or_else(|| anyhow!("Input device does not support {} Hz i16/f32 capture", rate))?;

        let format = supported.sample_format();
        let channels = supported.channels() as usize;
        info!(
            "Selected {} Hz, {} channel(s), {:?}, {} samples per chunk",
            supported.sample_rate().0,
            channels,
            format,
            self.config.chunk_size
        );

        let stream = match format {
            SampleFormat::I16 => {
                build_stream::<i16>(device, &supported, channels, self.config.chunk_size, chunks)
            }
            SampleFormat::F32 => {
                build_stream::<f32>(device, &supported, channels, self.config.chunk_size, chunks)
            }
            other => return Err(anyhow!("Unsupported sample format {:?}", other)),
        }
        .context("Failed to build input stream")?;

        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        info!("Starting stream...");
        self.stream()?.play()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        info!("Stopping stream...");
        match &self.stream {
            Some(stream) => stream.pause()?,
            None => warn!("Stop requested but no stream is open"),
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        info!("Closing stream...");
        self.stream = None;
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.stream = None;
        self.device = None;
        Ok(())
    }
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Only ranges that contain `target_rate` and deliver i16 or f32 samples
/// qualify. Among those, mono beats multi-channel and i16 beats f32.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfig> {
    configs
        .into_iter()
        .filter(|c| {
            matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
                && c.min_sample_rate().0 <= target_rate
                && target_rate <= c.max_sample_rate().0
        })
        .min_by_key(|c| (c.channels() != 1, c.sample_format() != SampleFormat::I16, c.channels()))
        .map(|c| c.with_sample_rate(cpal::SampleRate(target_rate)))
}

/// Build an input stream that downmixes to mono i16 and emits fixed chunks.
fn build_stream<T>(
    device: &cpal::Device,
    supported: &SupportedStreamConfig,
    channels: usize,
    chunk_size: usize,
    sender: Sender<Chunk>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let config: cpal::StreamConfig = supported.config();
    let mut pending: Vec<i16> = Vec::with_capacity(chunk_size * 2);

    device.build_input_stream(
        &config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            pending.extend(data.chunks(channels.max(1)).map(downmix::<T>));

            while pending.len() >= chunk_size {
                let samples: Vec<i16> = pending.drain(..chunk_size).collect();
                // The receiver is gone only while shutting down.
                let _ = sender.send(Chunk::new(samples, Instant::now()));
            }
        },
        |err| error!("An error occurred on the audio stream: {}", err),
        None,
    )
}

/// Averages one interleaved frame into a single i16 sample.
fn downmix<T>(frame: &[T]) -> i16
where
    T: cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let sum: i32 = frame
        .iter()
        .map(|&s| <i16 as cpal::Sample>::from_sample(s) as i32)
        .sum();
    (sum / frame.len().max(1) as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix::<i16>(&[100, 300]), 200);
        assert_eq!(downmix::<i16>(&[-32768, -32768]), -32768);
        assert_eq!(downmix::<i16>(&[42]), 42);
    }

    #[test]
    fn downmix_converts_float_samples() {
        assert_eq!(downmix::<f32>(&[0.0]), 0);
        assert!(downmix::<f32>(&[0.5, 0.5]) > 16_000);
        assert!(downmix::<f32>(&[-1.0]) <= -32_767);
    }
}
