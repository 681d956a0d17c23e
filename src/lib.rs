//! Murmur - Live voice conversation sessions with persistent lore
//!
//! This crate turns microphone audio into a streaming model
//! conversation and plays the replies back gaplessly, while a
//! background curator distills each exchange into durable facts
//! ("lore") that season future sessions. A coordinator relays one
//! canonical session state to any number of presentation clients.

pub mod billing;
pub mod client;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod link;
pub mod protocol;
pub mod state;
pub mod store;

// Re-export error types
pub use error::{MurmurError, Result};

// Re-export the core state types
pub use state::{LoreEntry, Persona, SessionState, StatePatch, UsageRecord};

// Re-export the wire protocol
pub use protocol::Envelope;

// Re-export the main actors
pub use client::PresentationClient;
pub use config::MurmurConfig;
pub use coordinator::{Coordinator, CoordinatorHandle, EngineLauncher};
pub use engine::{EngineConfig, EngineHandle, SessionEngine};
pub use store::SessionStore;
