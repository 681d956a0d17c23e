//! cpal output sink realising the playback schedule
//!
//! The sink owns the output device and a sample-position counter that
//! doubles as the device clock the scheduler runs against. Scheduled
//! chunks are written at their start position in the sample timeline;
//! everything else is silence.

use super::playback::{OutputClock, SinkCommand};
use crate::{MurmurError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam_channel::Receiver;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Clock derived from the sink's played-sample counter
#[derive(Clone)]
pub struct DeviceClock {
    position: Arc<AtomicU64>,
    sample_rate: u32,
}

impl OutputClock for DeviceClock {
    fn now(&self) -> f64 {
        self.position.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

struct PendingChunk {
    start_sample: u64,
    /// Length in device samples, after rate conversion
    device_len: u64,
    /// Source-rate over device-rate, for nearest-neighbour lookup
    rate_ratio: f64,
    samples: Vec<f32>,
}

pub struct AudioSink {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    position: Arc<AtomicU64>,
}

impl AudioSink {
    /// Create a sink on the default output device
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| MurmurError::Connection("No output device available".into()))?;

        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device
            .default_output_config()
            .map_err(|e| MurmurError::Connection(format!("Failed to get output config: {e}")))?
            .into();

        Ok(Self {
            device,
            config,
            stream: None,
            position: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Clock for the scheduler, in this device's time domain
    pub fn clock(&self) -> DeviceClock {
        DeviceClock {
            position: Arc::clone(&self.position),
            sample_rate: self.sample_rate(),
        }
    }

    /// Start consuming sink commands and playing scheduled audio
    pub fn start(&mut self, command_rx: Receiver<SinkCommand>) -> Result<()> {
        let channels = self.config.channels as usize;
        let sample_rate = self.sample_rate();
        let position = Arc::clone(&self.position);
        let mut pending: VecDeque<PendingChunk> = VecDeque::new();

        let err_fn = |err| {
            error!("Audio output stream error: {}", err);
        };

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Drain scheduler commands delivered since the last callback
                    while let Ok(command) = command_rx.try_recv() {
                        match command {
                            SinkCommand::Play(scheduled) => {
                                let start_sample =
                                    (scheduled.start_time * sample_rate as f64) as u64;
                                let device_len = (scheduled.chunk.duration_seconds()
                                    * sample_rate as f64)
                                    as u64;
                                let rate_ratio =
                                    scheduled.chunk.sample_rate as f64 / sample_rate as f64;
                                pending.push_back(PendingChunk {
                                    start_sample,
                                    device_len,
                                    rate_ratio,
                                    samples: scheduled.chunk.primary().to_vec(),
                                });
                            }
                            SinkCommand::Flush => pending.clear(),
                        }
                    }

                    data.fill(0.0);
                    let frames = data.len() / channels;
                    let base = position.load(Ordering::Relaxed);

                    for chunk in &pending {
                        let chunk_end = chunk.start_sample + chunk.device_len;
                        if chunk_end <= base || chunk.start_sample >= base + frames as u64 {
                            continue;
                        }
                        for frame in 0..frames {
                            let tick = base + frame as u64;
                            if tick < chunk.start_sample || tick >= chunk_end {
                                continue;
                            }
                            // Nearest-neighbour rate conversion from the
                            // source timeline to the device timeline
                            let src = ((tick - chunk.start_sample) as f64 * chunk.rate_ratio)
                                as usize;
                            let sample = chunk.samples[src.min(chunk.samples.len() - 1)];
                            for c in 0..channels {
                                data[frame * channels + c] += sample;
                            }
                        }
                    }

                    // Played-out chunks are done
                    pending.retain(|chunk| {
                        chunk.start_sample + chunk.device_len > base + frames as u64
                    });

                    position.fetch_add(frames as u64, Ordering::Relaxed);
                },
                err_fn,
                None,
            )
            .map_err(|e| MurmurError::Connection(format!("Failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| MurmurError::Connection(format!("Failed to start output stream: {e}")))?;

        self.stream = Some(stream);
        info!("Output sink started at {} Hz", sample_rate);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Output sink stopped");
        }
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.stop();
    }
}
