//! Model connection seam
//!
//! The streaming model endpoint is an external collaborator: Murmur
//! only depends on its open / send-audio-frame / receive / close
//! contract. A [`ModelConnector`] opens one live [`ModelLink`] per
//! session; everything the endpoint pushes back arrives as
//! [`LinkEvent`]s on the channel supplied at connect time, which the
//! Session Engine drains as turns of its event loop.

pub mod loopback;

pub use loopback::{LoopbackConnector, LoopbackTap};

use crate::state::Persona;
use crate::Result;
use crossbeam_channel::Sender;

/// Parameters for opening one model session
#[derive(Clone, Debug)]
pub struct SessionDescriptor {
    /// Full system instruction, persona template plus optional lore
    pub system_instruction: String,
    pub persona: Persona,
    /// Prebuilt voice used for model audio output
    pub voice: String,
}

/// Everything the model endpoint can push to the engine
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    /// Connection established and ready for audio
    Opened,
    /// A chunk of model speech in the wire transport encoding
    Audio(String),
    /// Finalized transcription of a user utterance
    UserText(String),
    /// The model's text reply for the current turn
    ModelText(String),
    /// The user began speaking over model output
    Interrupted,
    /// The connection closed, with the endpoint's reason
    Closed(String),
    /// The connection failed
    Error(String),
}

/// An open, live model connection
pub trait ModelLink: Send {
    /// Stream one encoded audio frame to the model as it arrives
    fn send_audio(&self, frame: &str) -> Result<()>;

    /// Close the connection; further sends fail
    fn close(&self);
}

/// Factory for model connections
///
/// Persona switches and resets tear down the old link and ask the
/// connector for a fresh one.
pub trait ModelConnector: Send {
    fn connect(
        &self,
        descriptor: SessionDescriptor,
        events: Sender<LinkEvent>,
    ) -> Result<Box<dyn ModelLink>>;
}
