//! In-process model link
//!
//! Stands in for the network endpoint when no credentials are
//! configured and in tests. Each connection exposes a tap that records
//! the frames the engine sent and lets callers inject events exactly
//! as the live endpoint would deliver them. With `echo` enabled, sent
//! audio is reflected back as model audio.

use super::{LinkEvent, ModelConnector, ModelLink, SessionDescriptor};
use crate::{MurmurError, Result};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Observation handle for one loopback connection
#[derive(Clone)]
pub struct LoopbackTap {
    pub descriptor: SessionDescriptor,
    sent: Arc<Mutex<Vec<String>>>,
    events: Sender<LinkEvent>,
    closed: Arc<AtomicBool>,
}

impl LoopbackTap {
    /// Frames the engine has streamed over this connection
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Whether the engine closed this connection
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver an event to the engine as the endpoint would
    pub fn inject(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }
}

/// Connector producing in-process connections
///
/// Clones share the tap list, so a test can keep one clone while the
/// engine owns the other.
#[derive(Clone)]
pub struct LoopbackConnector {
    echo: bool,
    taps: Arc<Mutex<Vec<LoopbackTap>>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            echo: false,
            taps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reflect sent audio back as model audio
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Taps for every connection opened so far, oldest first
    pub fn taps(&self) -> Vec<LoopbackTap> {
        self.taps.lock().clone()
    }

    /// Number of connections opened, which counts session resets
    pub fn connection_count(&self) -> usize {
        self.taps.lock().len()
    }

    /// Tap for the most recently opened connection
    pub fn latest_tap(&self) -> Option<LoopbackTap> {
        self.taps.lock().last().cloned()
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelConnector for LoopbackConnector {
    fn connect(
        &self,
        descriptor: SessionDescriptor,
        events: Sender<LinkEvent>,
    ) -> Result<Box<dyn ModelLink>> {
        debug!(persona = %descriptor.persona, "Opening loopback model link");

        let tap = LoopbackTap {
            descriptor,
            sent: Arc::new(Mutex::new(Vec::new())),
            events: events.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.taps.lock().push(tap.clone());

        let _ = events.send(LinkEvent::Opened);

        Ok(Box::new(LoopbackLink {
            echo: self.echo,
            sent: tap.sent,
            events,
            closed: tap.closed,
        }))
    }
}

struct LoopbackLink {
    echo: bool,
    sent: Arc<Mutex<Vec<String>>>,
    events: Sender<LinkEvent>,
    closed: Arc<AtomicBool>,
}

impl ModelLink for LoopbackLink {
    fn send_audio(&self, frame: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MurmurError::Connection("link is closed".into()));
        }
        self.sent.lock().push(frame.to_string());
        if self.echo {
            let _ = self.events.send(LinkEvent::Audio(frame.to_string()));
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Persona;
    use crossbeam_channel::unbounded;

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor {
            system_instruction: Persona::Eva.system_instruction().to_string(),
            persona: Persona::Eva,
            voice: "Orus".to_string(),
        }
    }

    #[test]
    fn test_connect_emits_opened() {
        let connector = LoopbackConnector::new();
        let (tx, rx) = unbounded();
        let _link = connector.connect(descriptor(), tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Opened);
        assert_eq!(connector.connection_count(), 1);
    }

    #[test]
    fn test_tap_records_sent_frames() {
        let connector = LoopbackConnector::new();
        let (tx, _rx) = unbounded();
        let link = connector.connect(descriptor(), tx).unwrap();

        link.send_audio("frame-a").unwrap();
        link.send_audio("frame-b").unwrap();

        let tap = connector.latest_tap().unwrap();
        assert_eq!(tap.sent_frames(), ["frame-a", "frame-b"]);
    }

    #[test]
    fn test_echo_reflects_audio() {
        let connector = LoopbackConnector::new().with_echo();
        let (tx, rx) = unbounded();
        let link = connector.connect(descriptor(), tx).unwrap();
        let _ = rx.try_recv(); // Opened

        link.send_audio("payload").unwrap();
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Audio("payload".into()));
    }

    #[test]
    fn test_send_after_close_fails() {
        let connector = LoopbackConnector::new();
        let (tx, _rx) = unbounded();
        let link = connector.connect(descriptor(), tx).unwrap();

        link.close();
        assert!(link.send_audio("late").is_err());
        assert!(connector.latest_tap().unwrap().is_closed());
    }
}
