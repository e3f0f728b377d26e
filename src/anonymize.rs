//! Participant and session de-identification
//!
//! Identifiers are salted SHA-256 digests of the identifying metadata fields.
//! They are stable across runs and independent of processing order, so the
//! same participant always receives the same `uid`.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Salted hasher producing participant (`uid`) and session (`val_id`) identifiers
#[derive(Debug, Clone)]
pub struct Anonymizer {
    salt: String,
}

impl Anonymizer {
    /// Create an anonymizer. The salt must not be empty.
    pub fn new(salt: impl Into<String>) -> Result<Self, AnalysisError> {
        let salt = salt.into();
        if salt.is_empty() {
            return Err(AnalysisError::Configuration(
                "anonymization salt must not be empty".to_string(),
            ));
        }
        Ok(Self { salt })
    }

    /// Participant identifier: digest of (salt, lab, participant id)
    pub fn uid(&self, lab: &str, participant_id: &str) -> String {
        self.digest(&[lab, participant_id])
    }

    /// Session identifier: digest of (salt, lab, participant id, timestamp).
    ///
    /// Two recordings of one participant with the same timestamp get the same
    /// `val_id`, which is how duplicate files are detected downstream.
    pub fn val_id(&self, lab: &str, participant_id: &str, timestamp: &str) -> String {
        self.digest(&[lab, participant_id, timestamp])
    }

    /// Each field is length-prefixed so no two field lists share an input.
    fn digest(&self, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for field in std::iter::once(self.salt.as_str()).chain(parts.iter().copied()) {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// One participant seen during a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    pub uid: String,
    pub ordinal: usize,
}

/// Batch-scoped map from `uid` to a first-seen ordinal.
///
/// Ordinals depend on file order and are only meant for readable labels.
/// They are never an identity source across runs.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    ordinals: HashMap<String, usize>,
    order: Vec<String>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a uid and return its ordinal (starting at 1).
    pub fn observe(&mut self, uid: &str) -> usize {
        if let Some(&ordinal) = self.ordinals.get(uid) {
            return ordinal;
        }
        self.order.push(uid.to_string());
        let ordinal = self.order.len();
        self.ordinals.insert(uid.to_string(), ordinal);
        ordinal
    }

    pub fn ordinal(&self, uid: &str) -> Option<usize> {
        self.ordinals.get(uid).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All participants in ordinal order
    pub fn entries(&self) -> Vec<ParticipantEntry> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, uid)| ParticipantEntry {
                uid: uid.clone(),
                ordinal: i + 1,
            })
            .collect()
    }
}
