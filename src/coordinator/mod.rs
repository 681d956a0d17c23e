//! Coordinator: canonical state relay between contexts
//!
//! The Coordinator is the single addressable mailbox for session
//! state. It merges every `SESSION_STATE_CHANGED` patch from the
//! Session Engine into the one canonical `SessionState`, broadcasts
//! the full result to every registered presentation client, and
//! forwards client commands to the engine's host context — launching
//! that context on demand and retrying delivery while it is not yet
//! ready. It never inspects audio payloads.

use crate::engine::{EngineCommand, EngineHandle, EngineReport};
use crate::protocol::Envelope;
use crate::state::{SessionState, StatePatch};
use crate::{MurmurError, Result};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of a registered presentation client
pub type ClientId = Uuid;

/// Interval between delivery retries while the engine host is not
/// ready. Cheap per attempt, never a tight loop.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Seam for creating the Session Engine's host context
///
/// The Coordinator launches the host lazily on the first command and
/// relaunches it when a stale handle is detected.
pub trait EngineLauncher: Send {
    fn launch(&mut self, report_tx: Sender<EngineReport>) -> Result<EngineHandle>;
}

/// Internal control messages for the coordinator worker
enum Control {
    Request { client: ClientId, envelope: Envelope },
    Register { client: ClientId, tx: Sender<Envelope> },
    Deregister(ClientId),
    Shutdown,
}

/// A registered client's mailbox plus its frequency gate
struct Peer {
    tx: Sender<Envelope>,
    /// Answered the probe and wants high-frequency payloads
    ready_for_frequency: bool,
    /// Probe already sent
    probed: bool,
}

/// A client's end of its registration
pub struct ClientConnection {
    pub id: ClientId,
    pub rx: Receiver<Envelope>,
}

/// Handle for talking to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    control_tx: Sender<Control>,
    shared: Arc<RwLock<SessionState>>,
}

impl CoordinatorHandle {
    /// Synchronous snapshot of the canonical state, for late joiners
    /// that cannot wait for the next broadcast.
    pub fn state(&self) -> SessionState {
        self.shared.read().clone()
    }

    /// Register a presentation client and obtain its mailbox
    pub fn register_client(&self) -> Result<ClientConnection> {
        let id = Uuid::new_v4();
        let (tx, rx) = bounded(64);
        self.control_tx
            .send(Control::Register { client: id, tx })
            .map_err(|e| MurmurError::Channel(format!("coordinator unavailable: {e}")))?;
        Ok(ClientConnection { id, rx })
    }

    /// Remove a client; its mailbox stops receiving broadcasts
    pub fn deregister_client(&self, id: ClientId) {
        let _ = self.control_tx.send(Control::Deregister(id));
    }

    /// Deliver a client request to the coordinator
    pub fn send(&self, client: ClientId, envelope: Envelope) -> Result<()> {
        self.control_tx
            .send(Control::Request { client, envelope })
            .map_err(|e| MurmurError::Channel(format!("coordinator unavailable: {e}")))
    }

    pub fn shutdown(&self) {
        let _ = self.control_tx.send(Control::Shutdown);
    }
}

/// The coordinator worker
pub struct Coordinator {
    state: SessionState,
    shared: Arc<RwLock<SessionState>>,
    control_rx: Receiver<Control>,
    report_tx: Sender<EngineReport>,
    report_rx: Receiver<EngineReport>,
    launcher: Box<dyn EngineLauncher>,
    engine: Option<EngineHandle>,
    pending: VecDeque<EngineCommand>,
    peers: HashMap<ClientId, Peer>,
}

impl Coordinator {
    pub fn new(launcher: Box<dyn EngineLauncher>) -> (Self, CoordinatorHandle) {
        let (control_tx, control_rx) = bounded(100);
        let (report_tx, report_rx) = bounded(1000);
        let state = SessionState::new();
        let shared = Arc::new(RwLock::new(state.clone()));

        let handle = CoordinatorHandle {
            control_tx,
            shared: Arc::clone(&shared),
        };

        let coordinator = Self {
            state,
            shared,
            control_rx,
            report_tx,
            report_rx,
            launcher,
            engine: None,
            pending: VecDeque::new(),
            peers: HashMap::new(),
        };

        (coordinator, handle)
    }

    /// Start the worker thread
    pub fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            info!("Coordinator starting");
            self.run();
            info!("Coordinator shut down");
        })
    }

    fn run(&mut self) {
        let retry_tick = tick(RETRY_INTERVAL);

        loop {
            select! {
                recv(self.control_rx) -> control => {
                    match control {
                        Ok(Control::Request { client, envelope }) => {
                            self.on_request(client, envelope);
                        }
                        Ok(Control::Register { client, tx }) => {
                            debug!("Client {} registered", client);
                            self.peers.insert(client, Peer {
                                tx,
                                ready_for_frequency: false,
                                probed: false,
                            });
                        }
                        Ok(Control::Deregister(client)) => {
                            debug!("Client {} deregistered", client);
                            self.peers.remove(&client);
                        }
                        Ok(Control::Shutdown) | Err(_) => {
                            if let Some(engine) = &self.engine {
                                let _ = engine.try_send(EngineCommand::Shutdown);
                            }
                            return;
                        }
                    }
                }

                recv(self.report_rx) -> report => {
                    match report {
                        Ok(EngineReport::StateChanged(patch)) => self.apply_patch(patch),
                        Ok(EngineReport::Frequency { input, output }) => {
                            self.broadcast_frequency(input, output);
                        }
                        Ok(EngineReport::Shutdown) => {
                            debug!("Engine host reported shutdown");
                            self.engine = None;
                        }
                        Err(_) => {}
                    }
                }

                recv(retry_tick) -> _ => {
                    if !self.pending.is_empty() {
                        self.drain_pending();
                    }
                }
            }
        }
    }

    fn on_request(&mut self, client: ClientId, envelope: Envelope) {
        match envelope {
            Envelope::GetState => {
                // Immediate snapshot back to the requester only
                if let Some(peer) = self.peers.get(&client) {
                    let _ = peer.tx.try_send(Envelope::StateUpdate {
                        state: self.state.clone(),
                    });
                }
            }

            Envelope::StartRecording => self.dispatch(EngineCommand::StartRecording),
            Envelope::StopRecording => self.dispatch(EngineCommand::StopRecording),
            Envelope::ResetSession => self.dispatch(EngineCommand::ResetSession),

            Envelope::SetSubscribed { subscribed } => {
                // Reflect immediately, then let the engine persist and
                // rebuild its session with the new entitlement.
                self.apply_patch(StatePatch::new().with_subscribed(subscribed));
                self.dispatch(EngineCommand::SetSubscribed(subscribed));
            }

            Envelope::SessionStateChanged { state } => {
                // An engine host reporting over the wire instead of the
                // in-process report channel; merge and rebroadcast the
                // same way.
                self.apply_patch(state);
            }

            Envelope::Pong { ready_for_frequency } => {
                if let Some(peer) = self.peers.get_mut(&client) {
                    peer.ready_for_frequency = ready_for_frequency;
                }
            }

            other => {
                debug!("Ignoring unexpected client envelope: {:?}", other);
            }
        }
    }

    /// Shallow-merge a patch into the canonical state and broadcast
    /// the full result to every client. Clients are optional and
    /// ephemeral: failed sends are swallowed, disconnected mailboxes
    /// are dropped.
    fn apply_patch(&mut self, patch: StatePatch) {
        self.state.apply(patch);
        *self.shared.write() = self.state.clone();

        let mut gone = Vec::new();
        for (id, peer) in &self.peers {
            let update = Envelope::StateUpdate {
                state: self.state.clone(),
            };
            match peer.tx.try_send(update) {
                Ok(()) => {}
                Err(TrySendError::Disconnected(_)) => gone.push(*id),
                Err(TrySendError::Full(_)) => {
                    debug!("Client {} is slow, skipping a state broadcast", id);
                }
            }
        }
        for id in gone {
            self.peers.remove(&id);
        }
    }

    /// Best-effort fan-out of a level snapshot. A recipient gets the
    /// payload only after answering the liveness probe, and a slow or
    /// closed recipient never stalls the others.
    fn broadcast_frequency(&mut self, input: Vec<u8>, output: Vec<u8>) {
        let mut gone = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            if !peer.probed {
                peer.probed = true;
                if let Err(TrySendError::Disconnected(_)) = peer.tx.try_send(Envelope::Ping) {
                    gone.push(*id);
                }
                continue;
            }
            if !peer.ready_for_frequency {
                continue;
            }
            let update = Envelope::FrequencyDataUpdate {
                input_levels: input.clone(),
                output_levels: output.clone(),
            };
            match peer.tx.try_send(update) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => gone.push(*id),
            }
        }
        for id in gone {
            self.peers.remove(&id);
        }
    }

    /// Queue a command for the engine host and attempt delivery
    fn dispatch(&mut self, command: EngineCommand) {
        self.pending.push_back(command);
        self.drain_pending();
    }

    /// Deliver queued commands in order, stopping at the first one
    /// that cannot go out yet. A command leaves the queue only after a
    /// successful send, so nothing is lost while the host is absent
    /// and nothing is delivered twice.
    fn drain_pending(&mut self) {
        let mut relaunched = false;

        while let Some(front) = self.pending.front() {
            if self.engine.is_none() {
                match self.launcher.launch(self.report_tx.clone()) {
                    Ok(handle) => {
                        info!("Engine host launched");
                        self.engine = Some(handle);
                    }
                    Err(e) => {
                        debug!("Engine host not available yet: {}", e);
                        return;
                    }
                }
            }

            let Some(engine) = self.engine.as_ref() else {
                return;
            };
            match engine.try_send(front.clone()) {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(TrySendError::Full(_)) => {
                    // Not ready to receive; retry on the next tick
                    debug!("Engine mailbox full, retrying shortly");
                    return;
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Stale handle: tear down and recreate once per pass
                    warn!("Stale engine handle detected, relaunching host");
                    self.engine = None;
                    if relaunched {
                        return;
                    }
                    relaunched = true;
                }
            }
        }
    }
}
