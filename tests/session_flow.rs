//! End-to-end session flows over real worker threads
//!
//! These tests run a full SessionEngine (and, where relevant, a
//! Coordinator) against the in-process loopback link, a scripted
//! microphone, and a manual playback clock, then assert on the state
//! patches the engine reports.

use crossbeam_channel::{bounded, Receiver, Sender};
use murmur::engine::curation::CurationClient;
use murmur::engine::playback::{ManualClock, PlaybackQueue};
use murmur::engine::{
    CaptureSource, EngineConfig, EngineHandle, EngineReport, SessionEngine,
};
use murmur::link::{LinkEvent, LoopbackConnector};
use murmur::state::{Persona, SessionState};
use murmur::SessionStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Curator that always distills the same fact
struct CannedCurator(&'static str);

impl CurationClient for CannedCurator {
    fn distill(&self, _user: &str, _model: &str) -> murmur::Result<String> {
        Ok(self.0.to_string())
    }
}

/// Curator that announces each call and then waits for the test's
/// release before returning
struct GatedCurator {
    started: Sender<()>,
    gate: Receiver<()>,
}

impl CurationClient for GatedCurator {
    fn distill(&self, user: &str, _model: &str) -> murmur::Result<String> {
        self.started.send(()).unwrap();
        let _ = self.gate.recv();
        Ok(format!("Noted: {user}"))
    }
}

/// Microphone whose open/close and frames the test controls
#[derive(Clone)]
struct ScriptedMic {
    deny: bool,
    open: Arc<AtomicBool>,
    frame_tx: Arc<Mutex<Option<Sender<Vec<f32>>>>>,
}

impl ScriptedMic {
    fn granted() -> Self {
        Self {
            deny: false,
            open: Arc::new(AtomicBool::new(false)),
            frame_tx: Arc::new(Mutex::new(None)),
        }
    }

    fn denied() -> Self {
        Self { deny: true, ..Self::granted() }
    }

    /// Deliver a capture frame as the device callback would
    fn emit(&self, samples: Vec<f32>) {
        if let Some(tx) = self.frame_tx.lock().as_ref() {
            let _ = tx.send(samples);
        }
    }
}

impl CaptureSource for ScriptedMic {
    fn open(&mut self, frame_tx: Sender<Vec<f32>>) -> murmur::Result<()> {
        if self.deny {
            return Err(murmur::MurmurError::MicAccess("denied by test".into()));
        }
        *self.frame_tx.lock() = Some(frame_tx);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        *self.frame_tx.lock() = None;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

struct Harness {
    handle: EngineHandle,
    report_rx: Receiver<EngineReport>,
    connector: LoopbackConnector,
    mic: ScriptedMic,
    store: SessionStore,
    state: SessionState,
}

impl Harness {
    fn launch(mic: ScriptedMic, curator: Box<dyn CurationClient>) -> Self {
        let store = SessionStore::open_temporary().unwrap();
        Self::launch_with_store(store, mic, curator)
    }

    fn launch_with_store(
        store: SessionStore,
        mic: ScriptedMic,
        curator: Box<dyn CurationClient>,
    ) -> Self {
        Self::launch_full(store, EngineConfig::default(), mic, curator)
    }

    fn launch_full(
        store: SessionStore,
        config: EngineConfig,
        mic: ScriptedMic,
        curator: Box<dyn CurationClient>,
    ) -> Self {
        let connector = LoopbackConnector::new();
        let (report_tx, report_rx) = bounded(1000);
        let (sink_tx, _sink_rx) = bounded(256);
        let playback = PlaybackQueue::new(Box::new(ManualClock::new(0.0)), sink_tx);

        let (engine, handle) = SessionEngine::new(
            config,
            &store,
            Box::new(connector.clone()),
            curator,
            Box::new(mic.clone()),
            playback,
            report_tx,
        )
        .unwrap();
        engine.start();

        Self {
            handle,
            report_rx,
            connector,
            mic,
            store,
            state: SessionState::new(),
        }
    }

    /// Apply reported patches until the predicate holds on the
    /// mirrored state, skipping level snapshots.
    fn wait_until(&mut self, what: &str, pred: impl Fn(&SessionState) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            match self.report_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(EngineReport::StateChanged(patch)) => {
                    self.state.apply(patch);
                    if pred(&self.state) {
                        return;
                    }
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
        panic!("timed out waiting for: {what} (last state: {:?})", self.state);
    }

    /// Drain patches for a while, asserting the predicate never holds
    fn assert_never(&mut self, what: &str, pred: impl Fn(&SessionState) -> bool) {
        let deadline = Instant::now() + Duration::from_millis(400);
        while Instant::now() < deadline {
            if let Ok(EngineReport::StateChanged(patch)) =
                self.report_rx.recv_timeout(Duration::from_millis(50))
            {
                self.state.apply(patch);
                assert!(!pred(&self.state), "unexpected state reached: {what}");
            }
        }
    }

    /// Block until a patch carrying exactly this status is reported
    fn wait_for_status_report(&mut self, status: &str) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(EngineReport::StateChanged(patch)) =
                self.report_rx.recv_timeout(Duration::from_millis(100))
            {
                let hit = patch.status.as_deref() == Some(status);
                self.state.apply(patch);
                if hit {
                    return;
                }
            }
        }
        panic!("no patch reported status {status:?}");
    }

    /// Drain patches for a while, asserting none carries this status
    fn assert_no_status_report(&mut self, status: &str) {
        let deadline = Instant::now() + Duration::from_millis(400);
        while Instant::now() < deadline {
            if let Ok(EngineReport::StateChanged(patch)) =
                self.report_rx.recv_timeout(Duration::from_millis(50))
            {
                assert_ne!(
                    patch.status.as_deref(),
                    Some(status),
                    "unexpected status report"
                );
                self.state.apply(patch);
            }
        }
    }

    fn inject(&self, event: LinkEvent) {
        self.connector.latest_tap().unwrap().inject(event);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.handle.shutdown();
    }
}

#[test]
fn recording_flow_streams_frames_to_the_link() {
    let mut h = Harness::launch(ScriptedMic::granted(), Box::new(CannedCurator("unused")));
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");

    h.handle.start_recording().unwrap();
    h.wait_until("listening", |s| s.recording && s.status == "Listening...");
    assert!(h.mic.is_open());

    // Frames delivered while recording reach the model link
    h.mic.emit(vec![0.25; 256]);
    h.mic.emit(vec![-0.25; 256]);
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let sent = h.connector.latest_tap().unwrap().sent_frames();
        if sent.len() == 2 {
            assert!(!sent[0].is_empty());
            break;
        }
        assert!(Instant::now() < deadline, "frames never reached the link");
        std::thread::sleep(Duration::from_millis(10));
    }

    h.handle.stop_recording().unwrap();
    h.wait_until("stopped", |s| {
        !s.recording && s.status == "Ready. Press the red button to talk."
    });
    assert!(!h.mic.is_open());
}

#[test]
fn daily_limit_meters_unsubscribed_sessions() {
    let store = SessionStore::open_temporary().unwrap();
    let mut h = Harness::launch_with_store(
        store,
        ScriptedMic::granted(),
        Box::new(CannedCurator("unused")),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");

    h.handle.start_recording().unwrap();
    h.wait_until("first charge", |s| s.usage_count == 1 && s.recording);
    h.handle.stop_recording().unwrap();
    h.wait_until("first stop", |s| !s.recording);

    h.handle.start_recording().unwrap();
    h.wait_until("second charge", |s| s.usage_count == 2 && s.recording);
    h.handle.stop_recording().unwrap();
    h.wait_until("second stop", |s| !s.recording);

    // Third attempt is refused without touching the microphone
    h.handle.start_recording().unwrap();
    h.wait_until("limit message", |s| {
        s.error == "Daily free limit reached. Subscribe for unlimited use."
    });
    assert_eq!(h.state.usage_count, 2);
    assert!(!h.state.recording);
    assert!(!h.mic.is_open());
}

#[test]
fn subscribed_sessions_are_metered_past_the_free_limit() {
    let store = SessionStore::open_temporary().unwrap();
    store.settings().unwrap().set_subscribed(true).unwrap();
    let mut h = Harness::launch_with_store(
        store,
        ScriptedMic::granted(),
        Box::new(CannedCurator("unused")),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");
    assert!(h.state.subscribed);

    // Subscribed starts are still counted, and the third is not
    // refused at the free limit of two.
    for expected in 1..=3u32 {
        h.handle.start_recording().unwrap();
        h.wait_until("charged start", move |s| {
            s.usage_count == expected && s.recording
        });
        h.handle.stop_recording().unwrap();
        h.wait_until("stopped", |s| !s.recording);
    }
    assert!(h.state.error.is_empty());

    // The count is persisted, not just reported
    let stored = h.store.settings().unwrap().usage().unwrap().unwrap();
    assert_eq!(stored.count, 3);
}

#[test]
fn mic_denial_surfaces_error_and_keeps_the_charge() {
    let mut h = Harness::launch(ScriptedMic::denied(), Box::new(CannedCurator("unused")));
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");

    h.handle.start_recording().unwrap();
    h.wait_until("mic error", |s| s.error == "Mic Error: denied by test");
    assert!(!h.state.recording);
    // The attempt still consumed one free use
    assert_eq!(h.state.usage_count, 1);
}

#[test]
fn curation_runs_only_for_subscribed_sessions() {
    let mut h = Harness::launch(
        ScriptedMic::granted(),
        Box::new(CannedCurator("The user collects typewriters.")),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");

    // Unsubscribed: a completed exchange produces no lore
    h.inject(LinkEvent::UserText("I collect typewriters.".into()));
    h.inject(LinkEvent::ModelText("How fascinating.".into()));
    h.assert_never("lore while unsubscribed", |s| !s.history.is_empty());
    assert!(h.store.lore().unwrap().is_empty().unwrap());

    // Subscribe; the session rebuilds and curation engages
    h.handle
        .send(murmur::engine::EngineCommand::SetSubscribed(true))
        .unwrap();
    h.wait_until("subscribed", |s| s.subscribed && s.status == "Session reset.");

    h.inject(LinkEvent::UserText("I collect typewriters.".into()));
    h.inject(LinkEvent::ModelText("How fascinating.".into()));
    h.wait_until("lore stored", |s| {
        s.status == "Lore updated. Ready to assist." && s.history.len() == 1
    });
    assert_eq!(
        h.state.history[0].fact,
        "The user collects typewriters."
    );

    // A second exchange appends in insertion order
    h.inject(LinkEvent::UserText("My oldest is from 1938.".into()));
    h.inject(LinkEvent::ModelText("A prewar model, then.".into()));
    h.wait_until("second fact", |s| s.history.len() == 2);

    let stored = h.store.lore().unwrap().all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].fact, "The user collects typewriters.");
}

#[test]
fn model_reply_without_user_text_is_not_curated() {
    let mut h = Harness::launch(
        ScriptedMic::granted(),
        Box::new(CannedCurator("should never be stored")),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");
    h.handle
        .send(murmur::engine::EngineCommand::SetSubscribed(true))
        .unwrap();
    h.wait_until("subscribed", |s| s.subscribed);

    h.inject(LinkEvent::ModelText("unpaired reply".into()));
    h.assert_never("unpaired curation", |s| !s.history.is_empty());
    assert!(h.store.lore().unwrap().is_empty().unwrap());
}

#[test]
fn dropped_curation_turn_reports_no_status() {
    let store = SessionStore::open_temporary().unwrap();
    store.settings().unwrap().set_subscribed(true).unwrap();
    let (started_tx, started_rx) = bounded(8);
    let (gate_tx, gate_rx) = bounded::<()>(8);
    let config = EngineConfig {
        curation_queue: 1,
        ..EngineConfig::default()
    };
    let mut h = Harness::launch_full(
        store,
        config,
        ScriptedMic::granted(),
        Box::new(GatedCurator {
            started: started_tx,
            gate: gate_rx,
        }),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");

    // First turn is pulled by the worker and held at the gate
    h.inject(LinkEvent::UserText("I live in Trondheim.".into()));
    h.inject(LinkEvent::ModelText("Lovely city.".into()));
    h.wait_for_status_report("Curating lore...");
    started_rx.recv_timeout(Duration::from_secs(3)).unwrap();

    // Second turn fills the queue and is announced
    h.inject(LinkEvent::UserText("My cat is Mabel.".into()));
    h.inject(LinkEvent::ModelText("Noted.".into()));
    h.wait_for_status_report("Curating lore...");

    // Third turn finds the queue full: dropped, and crucially the
    // status must not claim a curation that will never happen
    h.inject(LinkEvent::UserText("I am allergic to peanuts.".into()));
    h.inject(LinkEvent::ModelText("Good to know.".into()));
    h.assert_no_status_report("Curating lore...");

    // Release the worker; only the two queued turns become lore
    drop(gate_tx);
    h.wait_until("queued turns curated", |s| s.history.len() == 2);
    h.assert_never("dropped turn curated", |s| s.history.len() > 2);
}

#[test]
fn spoken_persona_switch_rebuilds_the_session_once() {
    let mut h = Harness::launch(
        ScriptedMic::granted(),
        Box::new(CannedCurator("should never be stored")),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");
    h.handle
        .send(murmur::engine::EngineCommand::SetSubscribed(true))
        .unwrap();
    h.wait_until("subscribed", |s| s.subscribed);
    let connections_before = h.connector.connection_count();

    h.inject(LinkEvent::UserText("Please switch to H.A.L. now".into()));
    h.wait_until("switched", |s| {
        s.persona == Persona::Hal && s.status == "Session reset."
    });

    // Exactly one new connection, carrying the new persona
    assert_eq!(h.connector.connection_count(), connections_before + 1);
    let descriptor = h.connector.latest_tap().unwrap().descriptor;
    assert_eq!(descriptor.persona, Persona::Hal);
    assert!(descriptor.system_instruction.contains("HAL 9000"));

    // The command utterance itself is never curated
    h.inject(LinkEvent::ModelText("Affirmative, Dave.".into()));
    h.assert_never("command curated", |s| !s.history.is_empty());
    assert!(h.store.lore().unwrap().is_empty().unwrap());
}

#[test]
fn switching_to_the_active_persona_is_a_no_op() {
    let store = SessionStore::open_temporary().unwrap();
    store.settings().unwrap().set_subscribed(true).unwrap();
    let mut h = Harness::launch_with_store(
        store,
        ScriptedMic::granted(),
        Box::new(CannedCurator("should never run")),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");
    let connections_before = h.connector.connection_count();

    h.inject(LinkEvent::UserText("hey eva, are you there?".into()));
    h.inject(LinkEvent::ModelText("Always here.".into()));

    // An intercepted utterance is consumed outright: no session
    // rebuild, and the exchange never reaches curation.
    h.assert_never("redundant reset", |s| s.status == "Session reset.");
    assert_eq!(h.connector.connection_count(), connections_before);
    h.assert_never("curation of a command", |s| !s.history.is_empty());
}

#[test]
fn subscribed_session_instruction_carries_lore() {
    let store = SessionStore::open_temporary().unwrap();
    let lore = store.lore().unwrap();
    lore.append(&murmur::LoreEntry::new(
        "The user collects typewriters.",
        1,
        vec![0.0; murmur::LoreEntry::EMBEDDING_DIM],
    ))
    .unwrap();
    let settings = store.settings().unwrap();
    settings.set_subscribed(true).unwrap();

    let mut h = Harness::launch_with_store(
        store,
        ScriptedMic::granted(),
        Box::new(CannedCurator("unused")),
    );
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");
    assert!(h.state.subscribed);
    assert_eq!(h.state.history.len(), 1);

    let descriptor = h.connector.latest_tap().unwrap().descriptor;
    assert!(descriptor
        .system_instruction
        .contains("### SEMANTICALLY SEARCHABLE LORE"));
    assert!(descriptor
        .system_instruction
        .contains("- The user collects typewriters."));
}

#[test]
fn interruption_flushes_scheduled_playback() {
    // Sink receiver kept open so the flush command is observable
    let store = SessionStore::open_temporary().unwrap();
    let connector = LoopbackConnector::new();
    let (report_tx, report_rx) = bounded(1000);
    let (sink_tx, sink_rx) = bounded(256);
    let playback = PlaybackQueue::new(Box::new(ManualClock::new(0.0)), sink_tx);

    let (engine, handle) = SessionEngine::new(
        EngineConfig::default(),
        &store,
        Box::new(connector.clone()),
        Box::new(CannedCurator("unused")),
        Box::new(ScriptedMic::granted()),
        playback,
        report_tx,
    )
    .unwrap();
    engine.start();

    let mut state = SessionState::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while state.status != "Ready to assist." {
        assert!(Instant::now() < deadline);
        if let Ok(EngineReport::StateChanged(patch)) =
            report_rx.recv_timeout(Duration::from_millis(100))
        {
            state.apply(patch);
        }
    }

    // A valid chunk gets scheduled, then an interruption flushes it
    let chunk = murmur::codec::encode_pcm(&vec![0.1; 240]);
    let tap = connector.latest_tap().unwrap();
    tap.inject(LinkEvent::Audio(chunk));
    tap.inject(LinkEvent::Interrupted);

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut saw_play = false;
    let mut saw_flush = false;
    while Instant::now() < deadline && !(saw_play && saw_flush) {
        match sink_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(murmur::engine::SinkCommand::Play(_)) => saw_play = true,
            Ok(murmur::engine::SinkCommand::Flush) => saw_flush = true,
            Err(_) => {}
        }
    }
    assert!(saw_play, "scheduled chunk never reached the sink");
    assert!(saw_flush, "interruption never flushed the sink");

    handle.shutdown().unwrap();
}

#[test]
fn malformed_model_audio_does_not_stop_the_session() {
    let mut h = Harness::launch(ScriptedMic::granted(), Box::new(CannedCurator("unused")));
    h.wait_until("initial ready", |s| s.status == "Ready to assist.");

    h.inject(LinkEvent::Audio("%%% not base64 %%%".into()));
    // The engine keeps serving commands afterwards
    h.handle.start_recording().unwrap();
    h.wait_until("still alive", |s| s.recording);
}
