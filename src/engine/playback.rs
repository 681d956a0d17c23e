//! Gapless playback scheduling
//!
//! Model audio arrives in variable-size chunks that must play back to
//! back with no caller-visible gap. The queue keeps a single
//! `next_start_time` cursor in the output device's clock domain: every
//! chunk starts at `max(next_start_time, now)` and the cursor advances
//! by exactly the chunk's duration. A flush (user interruption) drops
//! everything in flight and snaps the cursor back to the current
//! device time.

use crate::codec::AudioChunk;
use crossbeam_channel::Sender;
use std::time::Instant;
use tracing::debug;

/// Monotonic clock in the output device's time domain
pub trait OutputClock: Send {
    /// Current time in seconds
    fn now(&self) -> f64;
}

/// Wall-clock fallback used when no output device is attached
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for deterministic scheduling tests
#[derive(Clone)]
pub struct ManualClock {
    time: std::sync::Arc<parking_lot::Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: std::sync::Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.time.lock() += seconds;
    }

    pub fn set(&self, seconds: f64) {
        *self.time.lock() = seconds;
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        *self.time.lock()
    }
}

/// A chunk bound to its scheduled start time
#[derive(Clone, Debug)]
pub struct ScheduledChunk {
    pub start_time: f64,
    pub chunk: AudioChunk,
}

/// Instructions for the output sink
#[derive(Clone, Debug)]
pub enum SinkCommand {
    Play(ScheduledChunk),
    /// Stop everything scheduled or playing
    Flush,
}

/// The gapless scheduler and its cursor
pub struct PlaybackQueue {
    clock: Box<dyn OutputClock>,
    next_start_time: f64,
    sink_tx: Sender<SinkCommand>,
}

impl PlaybackQueue {
    pub fn new(clock: Box<dyn OutputClock>, sink_tx: Sender<SinkCommand>) -> Self {
        let next_start_time = clock.now();
        Self {
            clock,
            next_start_time,
            sink_tx,
        }
    }

    /// Schedule a chunk for gapless playback
    ///
    /// Never blocks on previous chunks finishing. If the sink cannot
    /// keep up the chunk is dropped, which is preferable to stalling
    /// the engine's event loop.
    pub fn schedule(&mut self, chunk: AudioChunk) -> ScheduledChunk {
        let start_time = self.next_start_time.max(self.clock.now());
        self.next_start_time = start_time + chunk.duration_seconds();

        let scheduled = ScheduledChunk { start_time, chunk };
        if self
            .sink_tx
            .try_send(SinkCommand::Play(scheduled.clone()))
            .is_err()
        {
            debug!("Output sink is not keeping up, dropping a scheduled chunk");
        }
        scheduled
    }

    /// Drop all in-flight audio and reset the cursor to now
    pub fn flush(&mut self) {
        self.next_start_time = self.clock.now();
        let _ = self.sink_tx.try_send(SinkCommand::Flush);
    }

    /// The cursor: where the next chunk will start at the earliest
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}
