//! Shared fakes for unit and scenario tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::encoded_image::EncodedImage;
use crate::matcher::CancellationFlag;
use crate::roster::CandidateRecord;
use crate::scorer::{FaceScorer, ScorerError};

/// The probe every test scan submits
pub(crate) fn probe() -> EncodedImage {
    EncodedImage::from_jpeg_bytes(b"probe")
}

/// Candidate whose reference image payload is its own ID, so the scripted
/// scorer can tell which candidate it is being asked about.
pub(crate) fn candidate(id: &str) -> CandidateRecord {
    let reference = EncodedImage::from_jpeg_bytes(id.as_bytes());
    CandidateRecord::new(id, &format!("Patient {}", id), Some(reference.into()))
}

pub(crate) fn candidate_without_photo(id: &str) -> CandidateRecord {
    CandidateRecord::new(id, &format!("Patient {}", id), None)
}

fn candidate_id(reference: &EncodedImage) -> String {
    reference
        .decode()
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Scorer with per-candidate canned answers that records every call
pub(crate) struct ScriptedScorer {
    scores: HashMap<String, Result<f32, ScorerError>>,
    confirmation: Result<bool, ScorerError>,
    cancel_after: Option<(String, CancellationFlag)>,
    score_log: Mutex<Vec<String>>,
    confirm_log: Mutex<Vec<String>>,
}

impl ScriptedScorer {
    pub(crate) fn new() -> Self {
        Self {
            scores: HashMap::new(),
            confirmation: Ok(false),
            cancel_after: None,
            score_log: Mutex::new(Vec::new()),
            confirm_log: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_score(mut self, id: &str, score: f32) -> Self {
        self.scores.insert(id.to_string(), Ok(score));
        self
    }

    pub(crate) fn with_score_failure(mut self, id: &str) -> Self {
        self.scores.insert(
            id.to_string(),
            Err(ScorerError::Request("connection reset".to_string())),
        );
        self
    }

    pub(crate) fn with_confirmation(mut self, same_person: bool) -> Self {
        self.confirmation = Ok(same_person);
        self
    }

    pub(crate) fn with_confirmation_failure(mut self) -> Self {
        self.confirmation = Err(ScorerError::InvalidResponse("maybe".to_string()));
        self
    }

    /// Trip `flag` right after `id` has been scored
    pub(crate) fn cancel_after_scoring(mut self, id: &str, flag: CancellationFlag) -> Self {
        self.cancel_after = Some((id.to_string(), flag));
        self
    }

    pub(crate) fn score_calls(&self) -> Vec<String> {
        self.score_log.lock().unwrap().clone()
    }

    pub(crate) fn confirm_calls(&self) -> Vec<String> {
        self.confirm_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl FaceScorer for ScriptedScorer {
    async fn score(
        &self,
        _probe: &EncodedImage,
        reference: &EncodedImage,
    ) -> Result<f32, ScorerError> {
        let id = candidate_id(reference);
        self.score_log.lock().unwrap().push(id.clone());

        if let Some((cancel_id, flag)) = &self.cancel_after {
            if *cancel_id == id {
                flag.cancel();
            }
        }

        self.scores
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Err(ScorerError::Request(format!("no scripted score for {}", id))))
    }

    async fn confirm(
        &self,
        _probe: &EncodedImage,
        reference: &EncodedImage,
    ) -> Result<bool, ScorerError> {
        self.confirm_log.lock().unwrap().push(candidate_id(reference));
        self.confirmation.clone()
    }
}
