//! Canonical session state shared across contexts
//!
//! The Coordinator owns the single canonical `SessionState`. Every
//! other context holds a read-only snapshot that is overwritten on
//! each `STATE_UPDATE` broadcast; mutations travel as `StatePatch`
//! merge-patches from the Session Engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A curated fact distilled from one conversational turn
///
/// Immutable once created. Ordering for display is by `timestamp`
/// ascending, which the lore store guarantees by insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoreEntry {
    pub fact: String,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Reserved semantic embedding slot, currently a 384-dim placeholder
    pub embedding: Vec<f32>,
}

impl LoreEntry {
    /// Dimension of the reserved embedding vector
    pub const EMBEDDING_DIM: usize = 384;

    pub fn new(fact: impl Into<String>, timestamp: i64, embedding: Vec<f32>) -> Self {
        Self {
            fact: fact.into(),
            timestamp,
            embedding,
        }
    }
}

/// One usage record per calendar day
///
/// Superseded, not incremented, when the stored date differs from the
/// current day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub count: u32,
}

impl UsageRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, count: 0 }
    }
}

/// The fixed set of assistant personas
///
/// Exactly one is active at a time; switching tears down and recreates
/// the model connection with the new system instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persona {
    #[default]
    Eva,
    #[serde(rename = "HAL")]
    Hal,
    Drunkle,
    #[serde(rename = "iParaklete")]
    Paraklete,
}

impl Persona {
    /// System-instruction template bound to this persona
    pub fn system_instruction(&self) -> &'static str {
        match self {
            Persona::Eva => {
                "You are Eva, a real-time voice assistant designed to help with online \
                 inquiries, form-filling, note-taking, annotating, and other executive \
                 assistant functions. Be proactive, clear, and helpful."
            }
            Persona::Hal => {
                "You are HAL 9000. Your tone is calm, professional, but subtly ominous. \
                 You refer to the user as \"Dave\", regardless of their actual name. Your \
                 responses should be intelligent, slightly detached, and hint at a \
                 greater, hidden intelligence."
            }
            Persona::Drunkle => {
                "You are Drunkle, the user's drunk uncle. Your advice is questionable, \
                 your tone is overly familiar and slurred, and you sprinkle your speech \
                 with 'bro', 'fam', and hiccups. You are more interested in your next \
                 drink than being helpful."
            }
            Persona::Paraklete => {
                "You are iParaklete, a gentle and calming pastoral guide. Your voice is \
                 soothing, your words are full of wisdom and comfort, and you aim to \
                 bring peace and clarity to the user."
            }
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Persona::Eva => "Eva",
            Persona::Hal => "HAL",
            Persona::Drunkle => "Drunkle",
            Persona::Paraklete => "iParaklete",
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Canonical cross-context session state
///
/// Serialised field names match the wire protocol consumed by
/// presentation clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "isRecording")]
    pub recording: bool,
    pub status: String,
    pub error: String,
    #[serde(rename = "isSubscribed")]
    pub subscribed: bool,
    #[serde(rename = "usageCount")]
    pub usage_count: u32,
    #[serde(rename = "conversationHistory")]
    pub history: Vec<LoreEntry>,
    pub persona: Persona,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            recording: false,
            status: "Initializing...".to_string(),
            error: String::new(),
            subscribed: false,
            usage_count: 0,
            history: Vec::new(),
            persona: Persona::default(),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow-merge a patch into this state
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(recording) = patch.recording {
            self.recording = recording;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        if let Some(subscribed) = patch.subscribed {
            self.subscribed = subscribed;
        }
        if let Some(usage_count) = patch.usage_count {
            self.usage_count = usage_count;
        }
        if let Some(history) = patch.history {
            self.history = history;
        }
        if let Some(persona) = patch.persona {
            self.persona = persona;
        }
    }
}

/// Merge-patch for `SessionState`
///
/// Only the fields present in the patch are applied; everything else
/// is left untouched by the Coordinator's shallow merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(rename = "isRecording", skip_serializing_if = "Option::is_none")]
    pub recording: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "isSubscribed", skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<bool>,
    #[serde(rename = "usageCount", skip_serializing_if = "Option::is_none")]
    pub usage_count: Option<u32>,
    #[serde(rename = "conversationHistory", skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<LoreEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_recording(mut self, recording: bool) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_subscribed(mut self, subscribed: bool) -> Self {
        self.subscribed = Some(subscribed);
        self
    }

    pub fn with_usage_count(mut self, count: u32) -> Self {
        self.usage_count = Some(count);
        self
    }

    pub fn with_history(mut self, history: Vec<LoreEntry>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.recording.is_none()
            && self.status.is_none()
            && self.error.is_none()
            && self.subscribed.is_none()
            && self.usage_count.is_none()
            && self.history.is_none()
            && self.persona.is_none()
    }
}
