//! Lore curation
//!
//! After each completed conversational turn of a subscribed session,
//! the (user text, model text) pair is handed to a worker thread that
//! asks the model to distill the exchange into one fact. Curation is
//! fully asynchronous to the audio path: a slow or failing distillation
//! never delays capture or playback, and its outcome is delivered back
//! to the engine's event loop as a message.

use crate::{MurmurError, Result};
use crossbeam_channel::{Receiver, Sender};
use rand::Rng;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// One completed conversational turn awaiting distillation
#[derive(Clone, Debug)]
pub struct CurationRequest {
    pub user_text: String,
    pub model_text: String,
}

/// The distilled fact, or why distillation failed
pub type CurationOutcome = Result<String>;

/// Client for the distillation endpoint
pub trait CurationClient: Send {
    /// Distill one exchange into a single curated fact
    fn distill(&self, user_text: &str, model_text: &str) -> Result<String>;
}

/// Prompt asking the model to extract one curated fact
pub fn curation_prompt(user_text: &str, model_text: &str) -> String {
    format!(
        "Based on the following conversation turn, extract the most critical facts, \
         data, or user intentions. The output should be a concise, curated piece of \
         \"lore\". Focus on information likely to be useful later. Err on the side of \
         zeitgeist. Output only the curated fact.\n\n\
         User: \"{user_text}\"\nAssistant: \"{model_text}\"\n\nCurated Lore:"
    )
}

/// Reserved per-entry embedding slot
///
/// No embedding model is wired up; the field keeps its shape with a
/// uniform random vector so downstream consumers can rely on the
/// dimension.
pub fn placeholder_embedding() -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..crate::state::LoreEntry::EMBEDDING_DIM)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect()
}

/// Worker thread that runs distillation requests in arrival order
pub struct CurationWorker {
    request_rx: Receiver<CurationRequest>,
    outcome_tx: Sender<CurationOutcome>,
    client: Box<dyn CurationClient>,
}

impl CurationWorker {
    pub fn new(
        request_rx: Receiver<CurationRequest>,
        outcome_tx: Sender<CurationOutcome>,
        client: Box<dyn CurationClient>,
    ) -> Self {
        Self {
            request_rx,
            outcome_tx,
            client,
        }
    }

    /// Start the worker thread
    ///
    /// The worker exits when the request channel disconnects. Outcomes
    /// for which no receiver remains are silently discarded, which is
    /// the required behaviour for results arriving after a reset.
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            while let Ok(request) = self.request_rx.recv() {
                debug!("Curating turn: {:?}", request.user_text);
                let outcome = self
                    .client
                    .distill(&request.user_text, &request.model_text)
                    .and_then(|fact| {
                        let fact = fact.trim().to_string();
                        if fact.is_empty() {
                            Err(MurmurError::Curation("empty distillation".into()))
                        } else {
                            Ok(fact)
                        }
                    });

                if let Err(e) = &outcome {
                    warn!("Curation failed: {}", e);
                }
                if self.outcome_tx.send(outcome).is_err() {
                    break;
                }
            }
            debug!("Curation worker exiting");
        })
    }
}

/// Curation client backed by the model's HTTP generate endpoint
pub struct HttpCurator {
    http: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl HttpCurator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl CurationClient for HttpCurator {
    fn distill(&self, user_text: &str, model_text: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{
                "parts": [{ "text": curation_prompt(user_text, model_text) }]
            }]
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| MurmurError::Curation(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Curation endpoint returned {}", status);
            return Err(MurmurError::Curation(format!("endpoint returned {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .map_err(|e| MurmurError::Curation(format!("malformed response: {e}")))?;

        let fact = payload["candidates"][0]["content"]["parts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|part| part["text"].as_str())
            .collect::<Vec<_>>()
            .join(" ");

        if fact.trim().is_empty() {
            return Err(MurmurError::Curation("response carried no text".into()));
        }
        Ok(fact)
    }
}
