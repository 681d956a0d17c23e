//! Microphone capture
//!
//! Acquiring the microphone is the only operation the platform may
//! deny, so opening the capture graph is fallible and surfaces as
//! `MicAccess`. The cpal stream is not `Send`, so each open spawns a
//! dedicated thread that builds the stream, holds it for the lifetime
//! of the recording, and drops it when closed. The device callback
//! downmixes to mono, accumulates fixed-size frames, and hands each
//! frame to the engine's event loop as it arrives.

use super::CaptureSource;
use crate::{MurmurError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MicCapture {
    frame_size: usize,
    /// Dropping this ends the stream thread
    stop_tx: Option<Sender<()>>,
    is_open: Arc<AtomicBool>,
}

impl MicCapture {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            stop_tx: None,
            is_open: Arc::new(AtomicBool::new(false)),
        }
    }

    fn device() -> Result<(Device, StreamConfig)> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| MurmurError::MicAccess("No input device available".into()))?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device
            .default_input_config()
            .map_err(|e| MurmurError::MicAccess(format!("Failed to get input config: {e}")))?
            .into();

        Ok((device, config))
    }

    /// Build and start the stream; runs on the stream thread
    fn build_stream(
        frame_size: usize,
        frame_tx: Sender<Vec<f32>>,
        is_open: Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let (device, config) = Self::device()?;
        let channels = config.channels as usize;
        let mut accumulator: Vec<f32> = Vec::with_capacity(frame_size);

        let err_fn = |err| {
            warn!("Audio input stream error: {}", err);
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !is_open.load(Ordering::Relaxed) {
                        return;
                    }

                    // Downmix to mono, then chop into fixed frames
                    for frame in data.chunks(channels) {
                        let sample = frame.iter().sum::<f32>() / channels as f32;
                        accumulator.push(sample);
                        if accumulator.len() == frame_size {
                            let full = std::mem::replace(
                                &mut accumulator,
                                Vec::with_capacity(frame_size),
                            );
                            if let Err(e) = frame_tx.try_send(full) {
                                debug!("Dropping capture frame: {}", e);
                            }
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| MurmurError::MicAccess(format!("Failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| MurmurError::MicAccess(format!("Failed to start input stream: {e}")))?;

        Ok(stream)
    }
}

impl CaptureSource for MicCapture {
    fn open(&mut self, frame_tx: Sender<Vec<f32>>) -> Result<()> {
        if self.is_open.load(Ordering::SeqCst) {
            warn!("Capture already open");
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let frame_size = self.frame_size;
        let is_open = Arc::clone(&self.is_open);

        thread::spawn(move || {
            let stream = match Self::build_stream(frame_size, frame_tx, Arc::clone(&is_open)) {
                Ok(stream) => {
                    is_open.store(true, Ordering::SeqCst);
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Park until closed; a dropped sender also ends the stream
            let _ = stop_rx.recv();
            is_open.store(false, Ordering::SeqCst);
            drop(stream);
            info!("Microphone capture stopped");
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                info!("Microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MurmurError::MicAccess(
                "Timed out waiting for the input device".into(),
            )),
        }
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.close();
    }
}
