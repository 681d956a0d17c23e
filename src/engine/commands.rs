//! Voice-command interception
//!
//! Every finalized user utterance is matched against a fixed table of
//! trigger phrases before it can become conversational content. First
//! match wins, and a matched command never reaches lore curation.

use crate::state::Persona;

/// A recognised spoken command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceCommand {
    SwitchPersona(Persona),
    ResetSession,
}

/// Trigger phrases in priority order
const PERSONA_TRIGGERS: &[(&str, Persona)] = &[
    ("switch to h.a.l.", Persona::Hal),
    ("activate hal", Persona::Hal),
    ("switch to drunkle", Persona::Drunkle),
    ("yo drunkle", Persona::Drunkle),
    ("switch to paraklete", Persona::Paraklete),
    ("activate paraklete", Persona::Paraklete),
    ("switch to eva", Persona::Eva),
    ("hey eva", Persona::Eva),
];

const RESET_TRIGGER: &str = "reset session";

/// Match an utterance against the command table, case-insensitively
pub fn intercept(text: &str) -> Option<VoiceCommand> {
    let lowered = text.to_lowercase();

    for (phrase, persona) in PERSONA_TRIGGERS {
        if lowered.contains(phrase) {
            return Some(VoiceCommand::SwitchPersona(*persona));
        }
    }

    if lowered.contains(RESET_TRIGGER) {
        return Some(VoiceCommand::ResetSession);
    }

    None
}
