//! Session Engine: the hardware-owning context
//!
//! Exactly one engine instance holds the microphone, the model
//! connection, the playback scheduler, and the session state machine.
//! It runs as a single worker thread whose `select!` loop makes the
//! capture callback, model-message handling, and playback scheduling
//! non-overlapping turns, so no two handlers race on engine fields.
//! Everything the rest of the system learns about the session arrives
//! as [`EngineReport`]s relayed through the Coordinator.

pub mod commands;
pub mod curation;
pub mod playback;
pub mod usage;

#[cfg(feature = "audio-io")]
pub mod capture;
#[cfg(feature = "audio-io")]
pub mod sink;

pub use commands::{intercept, VoiceCommand};
pub use curation::{CurationClient, CurationWorker, HttpCurator};
pub use playback::{ManualClock, OutputClock, PlaybackQueue, ScheduledChunk, SinkCommand, SystemClock};
pub use usage::UsageMeter;

#[cfg(feature = "audio-io")]
pub use capture::MicCapture;
#[cfg(feature = "audio-io")]
pub use sink::{AudioSink, DeviceClock};

use crate::codec::{decode_pcm, encode_pcm, SpectrumAnalyser};
use crate::link::{LinkEvent, ModelConnector, ModelLink, SessionDescriptor};
use crate::state::{LoreEntry, Persona, StatePatch};
use crate::store::{LoreStore, SessionStore, SettingsStore};
use crate::{MurmurError, Result};
use chrono::{Local, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use curation::{placeholder_embedding, CurationOutcome, CurationRequest};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Recording side of the session state machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordingPhase {
    #[default]
    Uninitialized,
    Idle,
    /// Waiting for the platform to grant the capture device
    RequestingMic,
    Recording,
    Stopping,
}

impl RecordingPhase {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingPhase::Recording)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, RecordingPhase::Idle)
    }
}

/// Model-link side of the state machine, orthogonal to recording
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkPhase {
    #[default]
    Reconnecting,
    Connected,
}

/// Source of microphone frames
///
/// Opening is the only platform operation that may be denied; a
/// denial surfaces as `MicAccess`.
pub trait CaptureSource: Send {
    fn open(&mut self, frame_tx: Sender<Vec<f32>>) -> Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// Capture source for builds without audio hardware access
pub struct NullCapture {
    open: bool,
}

impl NullCapture {
    pub fn new() -> Self {
        Self { open: false }
    }
}

impl Default for NullCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for NullCapture {
    fn open(&mut self, _frame_tx: Sender<Vec<f32>>) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Engine tunables
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Free recordings per calendar day for unsubscribed sessions
    pub daily_limit: u32,
    /// Sample rate of model audio output
    pub output_sample_rate: u32,
    /// Capture frame length in samples
    pub frame_size: usize,
    /// Frequency bins per level broadcast
    pub spectrum_bins: usize,
    /// Prebuilt voice requested from the model
    pub voice: String,
    /// Turns that may wait for the curation worker before later
    /// turns are dropped
    pub curation_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            daily_limit: 2,
            output_sample_rate: 24000,
            frame_size: 256,
            spectrum_bins: 16,
            voice: "Orus".to_string(),
            curation_queue: 100,
        }
    }
}

/// Commands the Coordinator forwards into the engine's mailbox
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCommand {
    StartRecording,
    StopRecording,
    ResetSession,
    SetSubscribed(bool),
    Shutdown,
}

/// Everything the engine reports back to the Coordinator
#[derive(Clone, Debug)]
pub enum EngineReport {
    /// Partial state change to merge and rebroadcast
    StateChanged(StatePatch),
    /// High-frequency audio level snapshot
    Frequency { input: Vec<u8>, output: Vec<u8> },
    /// The engine has shut down
    Shutdown,
}

/// Handle for sending commands to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| MurmurError::Delivery(format!("engine command not delivered: {e}")))
    }

    /// Non-blocking send used by the Coordinator's retry loop
    pub fn try_send(
        &self,
        command: EngineCommand,
    ) -> std::result::Result<(), crossbeam_channel::TrySendError<EngineCommand>> {
        self.command_tx.try_send(command)
    }

    pub fn start_recording(&self) -> Result<()> {
        self.send(EngineCommand::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.send(EngineCommand::StopRecording)
    }

    pub fn reset_session(&self) -> Result<()> {
        self.send(EngineCommand::ResetSession)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(EngineCommand::Shutdown)
    }

    /// Handle over a bare channel, without a running worker
    #[cfg(test)]
    pub(crate) fn for_tests(command_tx: Sender<EngineCommand>) -> Self {
        Self { command_tx }
    }
}

/// The session engine worker
pub struct SessionEngine {
    config: EngineConfig,
    settings: SettingsStore,
    lore: LoreStore,
    connector: Box<dyn ModelConnector>,
    capture: Box<dyn CaptureSource>,
    playback: PlaybackQueue,
    report_tx: Sender<EngineReport>,

    command_rx: Receiver<EngineCommand>,
    frame_tx: Sender<Vec<f32>>,
    frame_rx: Receiver<Vec<f32>>,
    link_event_tx: Sender<LinkEvent>,
    link_event_rx: Receiver<LinkEvent>,
    curation_tx: Sender<CurationRequest>,
    curation_rx: Receiver<CurationOutcome>,
    curation_worker: Option<CurationWorker>,

    // Session state
    phase: RecordingPhase,
    link_phase: LinkPhase,
    link: Option<Box<dyn ModelLink>>,
    persona: Persona,
    subscribed: bool,
    usage: Option<UsageMeter>,
    pending_user_text: Option<String>,
    input_analyser: SpectrumAnalyser,
    output_analyser: SpectrumAnalyser,
}

impl SessionEngine {
    /// Create an engine and its command handle
    ///
    /// The engine does nothing until [`start`](Self::start) spawns its
    /// worker thread, which begins with `initialize`.
    pub fn new(
        config: EngineConfig,
        store: &SessionStore,
        connector: Box<dyn ModelConnector>,
        curator: Box<dyn CurationClient>,
        capture: Box<dyn CaptureSource>,
        playback: PlaybackQueue,
        report_tx: Sender<EngineReport>,
    ) -> Result<(Self, EngineHandle)> {
        let settings = store.settings()?;
        let lore = store.lore()?;

        let (command_tx, command_rx) = bounded(100);
        let (frame_tx, frame_rx) = bounded(1000);
        let (link_event_tx, link_event_rx) = bounded(1000);
        let (curation_tx, curation_req_rx) = bounded(config.curation_queue);
        let (curation_out_tx, curation_rx) = bounded(100);

        let curation_worker = CurationWorker::new(curation_req_rx, curation_out_tx, curator);

        let input_analyser = SpectrumAnalyser::new(config.spectrum_bins);
        let output_analyser = SpectrumAnalyser::new(config.spectrum_bins);

        let engine = Self {
            config,
            settings,
            lore,
            connector,
            capture,
            playback,
            report_tx,
            command_rx,
            frame_tx,
            frame_rx,
            link_event_tx,
            link_event_rx,
            curation_tx,
            curation_rx,
            curation_worker: Some(curation_worker),
            phase: RecordingPhase::Uninitialized,
            link_phase: LinkPhase::Reconnecting,
            link: None,
            persona: Persona::default(),
            subscribed: false,
            usage: None,
            pending_user_text: None,
            input_analyser,
            output_analyser,
        };

        Ok((engine, EngineHandle { command_tx }))
    }

    /// Spawn the worker thread and the curation worker
    pub fn start(mut self) -> JoinHandle<()> {
        if let Some(worker) = self.curation_worker.take() {
            worker.start();
            info!("Curation worker started");
        }
        thread::spawn(move || {
            self.run();
        })
    }

    fn run(mut self) {
        info!("Session engine starting");

        if let Err(e) = self.initialize() {
            error!("Engine initialization failed: {}", e);
            self.report(StatePatch::error(e.user_message()));
        }

        let visual_tick = tick(Duration::from_millis(16));

        loop {
            select! {
                recv(self.command_rx) -> command => {
                    match command {
                        Ok(EngineCommand::StartRecording) => self.start_recording(),
                        Ok(EngineCommand::StopRecording) => self.stop_recording(),
                        Ok(EngineCommand::ResetSession) => self.reset_session(),
                        Ok(EngineCommand::SetSubscribed(subscribed)) => {
                            self.set_subscribed(subscribed);
                        }
                        Ok(EngineCommand::Shutdown) | Err(_) => {
                            break;
                        }
                    }
                }

                recv(self.frame_rx) -> frame => {
                    if let Ok(samples) = frame {
                        self.on_capture_frame(&samples);
                    }
                }

                recv(self.link_event_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_link_event(event);
                    }
                }

                recv(self.curation_rx) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.on_curation_outcome(outcome);
                    }
                }

                recv(visual_tick) -> _ => {
                    let input = self.input_analyser.update().to_vec();
                    let output = self.output_analyser.update().to_vec();
                    let _ = self.report_tx.try_send(EngineReport::Frequency { input, output });
                }
            }
        }

        self.capture.close();
        if let Some(link) = self.link.take() {
            link.close();
        }
        let _ = self.report_tx.send(EngineReport::Shutdown);
        info!("Session engine shut down");
    }

    /// Load persisted session state and open the model connection
    fn initialize(&mut self) -> Result<()> {
        self.subscribed = self.settings.subscribed()?;
        let meter = UsageMeter::load(
            self.settings.clone(),
            self.config.daily_limit,
            Local::now().date_naive(),
        )?;
        let usage_count = meter.count();
        self.usage = Some(meter);
        self.phase = RecordingPhase::Idle;

        self.connect_session();

        self.report(
            StatePatch::new()
                .with_subscribed(self.subscribed)
                .with_usage_count(usage_count)
                .with_history(self.lore.all()?)
                .with_persona(self.persona)
                .with_status("Ready to assist."),
        );
        Ok(())
    }

    /// Build the persona instruction, augmented with lore for
    /// subscribed sessions, and open a fresh link.
    fn connect_session(&mut self) {
        let mut instruction = self.persona.system_instruction().to_string();

        if self.subscribed {
            match self.lore.render_facts() {
                Ok(facts) if !facts.is_empty() => {
                    instruction.push_str(
                        "\n\n### SEMANTICALLY SEARCHABLE LORE\nHere are curated facts from \
                         past interactions. Before responding, review this lore to provide \
                         contextual and accurate answers.\n\n",
                    );
                    instruction.push_str(&facts);
                }
                Ok(_) => {}
                Err(e) => warn!("Could not render lore for the system instruction: {}", e),
            }
        }

        let descriptor = SessionDescriptor {
            system_instruction: instruction,
            persona: self.persona,
            voice: self.config.voice.clone(),
        };

        match self.connector.connect(descriptor, self.link_event_tx.clone()) {
            Ok(link) => {
                self.link = Some(link);
                self.link_phase = LinkPhase::Connected;
            }
            Err(e) => {
                warn!("Model connection failed: {}", e);
                self.link = None;
                self.link_phase = LinkPhase::Reconnecting;
                self.report(StatePatch::error(e.user_message()));
            }
        }
    }

    fn start_recording(&mut self) {
        if self.phase.is_recording() {
            return;
        }

        let today = Local::now().date_naive();
        let meter = match self.usage.as_mut() {
            Some(meter) => meter,
            None => {
                self.report(StatePatch::error("Session is not initialized."));
                return;
            }
        };

        // Only the free tier is refused at the limit; every session
        // start is charged either way.
        if !self.subscribed && meter.exhausted(today) {
            self.report(StatePatch::error(MurmurError::QuotaExceeded.user_message()));
            return;
        }
        match meter.charge(today) {
            Ok(count) => {
                self.report(StatePatch::new().with_usage_count(count));
            }
            Err(e) => {
                error!("Usage charge failed: {}", e);
                self.report(StatePatch::error(e.user_message()));
                return;
            }
        }

        self.phase = RecordingPhase::RequestingMic;
        self.report(StatePatch::status("Requesting microphone access..."));

        match self.capture.open(self.frame_tx.clone()) {
            Ok(()) => {
                self.phase = RecordingPhase::Recording;
                self.report(
                    StatePatch::new()
                        .with_recording(true)
                        .with_status("Listening...")
                        .with_error(""),
                );
            }
            Err(e) => {
                // The charge already made is not refunded
                warn!("Microphone request denied: {}", e);
                self.phase = RecordingPhase::Idle;
                self.report(StatePatch::error(e.user_message()));
            }
        }
    }

    fn stop_recording(&mut self) {
        if !matches!(
            self.phase,
            RecordingPhase::Recording | RecordingPhase::RequestingMic
        ) {
            return;
        }

        self.phase = RecordingPhase::Stopping;
        self.report(
            StatePatch::new()
                .with_recording(false)
                .with_status("Processing..."),
        );

        self.capture.close();
        self.phase = RecordingPhase::Idle;
        self.report(StatePatch::status("Ready. Press the red button to talk."));
    }

    fn reset_session(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.playback.flush();
        self.pending_user_text = None;
        self.connect_session();
        self.report(StatePatch::new().with_status("Session reset.").with_error(""));
    }

    fn set_subscribed(&mut self, subscribed: bool) {
        if let Err(e) = self.settings.set_subscribed(subscribed) {
            error!("Failed to persist subscription flag: {}", e);
            self.report(StatePatch::error(e.user_message()));
            return;
        }
        self.subscribed = subscribed;
        self.report(StatePatch::new().with_subscribed(subscribed));
        self.reset_session();
    }

    fn on_capture_frame(&mut self, samples: &[f32]) {
        if !self.phase.is_recording() {
            return;
        }

        self.input_analyser.push(samples);

        if let Some(link) = &self.link {
            let frame = encode_pcm(samples);
            if let Err(e) = link.send_audio(&frame) {
                warn!("Audio frame not delivered to the model: {}", e);
                self.link_phase = LinkPhase::Reconnecting;
                self.report(StatePatch::error(e.user_message()));
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                self.link_phase = LinkPhase::Connected;
                self.report(StatePatch::status("Session opened. Ready to assist."));
            }

            LinkEvent::Audio(payload) => self.on_model_audio(&payload),

            LinkEvent::UserText(text) => self.on_user_text(text),

            LinkEvent::ModelText(text) => self.on_model_text(text),

            LinkEvent::Interrupted => self.on_interrupted(),

            LinkEvent::Closed(reason) => {
                self.link = None;
                self.link_phase = LinkPhase::Reconnecting;
                self.report(StatePatch::status(format!("Session closed: {reason}")));
            }

            LinkEvent::Error(message) => {
                self.report(StatePatch::error(message));
            }
        }
    }

    /// Decode a model audio chunk and schedule it for gapless playback
    fn on_model_audio(&mut self, payload: &str) {
        match decode_pcm(payload, self.config.output_sample_rate, 1) {
            Ok(chunk) => {
                self.output_analyser.push(chunk.primary());
                self.playback.schedule(chunk);
            }
            Err(e) => {
                // Drop the offending chunk; the stream continues
                warn!("Model audio chunk dropped: {}", e);
            }
        }
    }

    /// Voice-command interception runs before any utterance becomes
    /// conversational content.
    fn on_user_text(&mut self, text: String) {
        match intercept(&text) {
            Some(VoiceCommand::SwitchPersona(persona)) => {
                if persona != self.persona {
                    self.persona = persona;
                    self.report(
                        StatePatch::new()
                            .with_persona(persona)
                            .with_status(format!("Switched to {persona} mode.")),
                    );
                    self.reset_session();
                }
                // A matched command never reaches curation
            }
            Some(VoiceCommand::ResetSession) => {
                self.reset_session();
            }
            None => {
                self.pending_user_text = Some(text);
            }
        }
    }

    /// Pair the model reply with the pending utterance and submit the
    /// turn for curation.
    fn on_model_text(&mut self, text: String) {
        let Some(user_text) = self.pending_user_text.take() else {
            return;
        };
        if !self.subscribed {
            return;
        }

        debug!("Submitting turn for curation");
        let request = CurationRequest {
            user_text,
            model_text: text,
        };
        // Status reflects only turns actually queued; a dropped turn
        // must not leave "Curating lore..." stuck on screen.
        if self.curation_tx.try_send(request).is_ok() {
            self.report(StatePatch::status("Curating lore..."));
        } else {
            warn!("Curation queue is full, dropping a turn");
        }
    }

    /// The user spoke over model output
    fn on_interrupted(&mut self) {
        self.playback.flush();
    }

    fn on_curation_outcome(&mut self, outcome: CurationOutcome) {
        // Outcomes can arrive after a reset or unsubscribe; apply only
        // if still relevant.
        if !self.subscribed {
            return;
        }

        match outcome {
            Ok(fact) => {
                let entry = LoreEntry::new(
                    fact,
                    Utc::now().timestamp_millis(),
                    placeholder_embedding(),
                );
                match self.lore.append(&entry).and_then(|_| self.lore.all()) {
                    Ok(history) => {
                        self.report(
                            StatePatch::new()
                                .with_history(history)
                                .with_status("Lore updated. Ready to assist."),
                        );
                    }
                    Err(e) => {
                        error!("Failed to store lore entry: {}", e);
                        self.report(StatePatch::error(e.user_message()));
                    }
                }
            }
            Err(e) => {
                self.report(StatePatch::error(e.user_message()));
            }
        }
    }

    fn report(&self, patch: StatePatch) {
        let _ = self.report_tx.send(EngineReport::StateChanged(patch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_phase_predicates() {
        assert!(RecordingPhase::Recording.is_recording());
        assert!(!RecordingPhase::Idle.is_recording());
        assert!(RecordingPhase::Idle.is_idle());
        assert!(!RecordingPhase::Uninitialized.is_idle());
    }

    #[test]
    fn test_null_capture_opens_and_closes() {
        let mut capture = NullCapture::new();
        assert!(!capture.is_open());

        let (tx, _rx) = bounded(1);
        capture.open(tx).unwrap();
        assert!(capture.is_open());

        capture.close();
        assert!(!capture.is_open());
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.daily_limit, 2);
        assert_eq!(config.output_sample_rate, 24000);
        assert_eq!(config.frame_size, 256);
        assert_eq!(config.spectrum_bins, 16);
    }
}
