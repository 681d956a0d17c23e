//! Presentation client: a view over the canonical session state
//!
//! A presentation client holds no authoritative state. It registers
//! with the Coordinator, seeds itself from a synchronous snapshot,
//! then overwrites its local copy with every full `STATE_UPDATE`
//! broadcast. Commands go out fire-and-forget; rendering is the
//! caller's concern.

use crate::billing::{BillingProvider, Offering};
use crate::coordinator::{ClientConnection, CoordinatorHandle};
use crate::protocol::Envelope;
use crate::state::SessionState;
use crate::Result;
use crossbeam_channel::TryRecvError;
use tracing::debug;

/// Most recent spectrum snapshot, only populated after the client
/// opts in to high-frequency payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LevelSnapshot {
    pub input: Vec<u8>,
    pub output: Vec<u8>,
}

pub struct PresentationClient {
    coordinator: CoordinatorHandle,
    connection: ClientConnection,
    state: SessionState,
    levels: LevelSnapshot,
    /// Whether this client wants spectrum payloads at all; a headless
    /// client leaves this off and the Coordinator never sends them.
    wants_frequency: bool,
}

impl PresentationClient {
    /// Register with the coordinator and seed from the current state
    pub fn connect(coordinator: CoordinatorHandle) -> Result<Self> {
        let connection = coordinator.register_client()?;
        let state = coordinator.state();
        debug!("Presentation client {} connected", connection.id);
        Ok(Self {
            coordinator,
            connection,
            state,
            levels: LevelSnapshot::default(),
            wants_frequency: false,
        })
    }

    /// Opt in to spectrum payloads; takes effect at the next probe
    pub fn enable_frequency(&mut self) {
        self.wants_frequency = true;
    }

    /// Local copy of the canonical state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn levels(&self) -> &LevelSnapshot {
        &self.levels
    }

    pub fn start_recording(&self) -> Result<()> {
        self.send(Envelope::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.send(Envelope::StopRecording)
    }

    pub fn reset_session(&self) -> Result<()> {
        self.send(Envelope::ResetSession)
    }

    pub fn set_subscribed(&self, subscribed: bool) -> Result<()> {
        self.send(Envelope::SetSubscribed { subscribed })
    }

    /// Reconcile the subscription flag with the billing provider's
    /// current entitlements. Returns the resolved flag.
    pub fn sync_entitlement(&self, billing: &dyn BillingProvider) -> Result<bool> {
        let pro = billing.customer_info()?.has_pro_access();
        self.set_subscribed(pro)?;
        Ok(pro)
    }

    /// Run a purchase and propagate the resulting entitlement
    pub fn purchase(&self, billing: &mut dyn BillingProvider, offering: &Offering) -> Result<()> {
        let info = billing.purchase(offering)?;
        self.set_subscribed(info.has_pro_access())
    }

    /// Ask for a fresh snapshot; the reply lands in the mailbox
    pub fn request_state(&self) -> Result<()> {
        self.send(Envelope::GetState)
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        self.coordinator.send(self.connection.id, envelope)
    }

    /// Drain all queued envelopes, updating the local mirror.
    /// Returns true if the rendered state changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.connection.rx.try_recv() {
                Ok(envelope) => {
                    if self.absorb(envelope) {
                        changed = true;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        changed
    }

    /// Block until the next envelope arrives, then drain the rest
    pub fn pump_blocking(&mut self) -> bool {
        match self.connection.rx.recv() {
            Ok(envelope) => {
                let mut changed = self.absorb(envelope);
                if self.pump() {
                    changed = true;
                }
                changed
            }
            Err(_) => false,
        }
    }

    fn absorb(&mut self, envelope: Envelope) -> bool {
        match envelope {
            Envelope::StateUpdate { state } => {
                // Full replacement, never a merge: the broadcast is
                // already the canonical whole.
                self.state = state;
                true
            }
            Envelope::FrequencyDataUpdate { input_levels, output_levels } => {
                self.levels = LevelSnapshot {
                    input: input_levels,
                    output: output_levels,
                };
                true
            }
            Envelope::Ping => {
                let _ = self.send(Envelope::Pong {
                    ready_for_frequency: self.wants_frequency,
                });
                false
            }
            other => {
                debug!("Presentation client ignoring envelope: {:?}", other);
                false
            }
        }
    }
}

impl Drop for PresentationClient {
    fn drop(&mut self) {
        self.coordinator.deregister_client(self.connection.id);
    }
}
