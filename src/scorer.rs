//! Face comparison scorer.
//!
//! The recognition itself happens in an external vision model. This module
//! defines the seam the match policy talks to (`FaceScorer`) and the
//! LLM-router-backed implementation: prompts, request shaping and parsing of
//! the model's replies into a confidence score or a yes/no verdict.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::encoded_image::EncodedImage;
use crate::llm_client::{tasks, ContentPart, LLMClient, VisionOptions};

/// Lowest and highest score a scorer may report
pub const SCORE_MIN: f32 = 0.0;
pub const SCORE_MAX: f32 = 100.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScorerError {
    #[error("Scorer request failed: {0}")]
    Request(String),
    #[error("Unparseable scorer response: {0}")]
    InvalidResponse(String),
}

/// Compares a probe image against one reference image.
#[async_trait]
pub trait FaceScorer: Send + Sync {
    /// Similarity confidence in [0, 100] that both images show the same person
    async fn score(&self, probe: &EncodedImage, reference: &EncodedImage)
        -> Result<f32, ScorerError>;

    /// Stricter binary check used to confirm a merely plausible best candidate
    async fn confirm(&self, probe: &EncodedImage, reference: &EncodedImage)
        -> Result<bool, ScorerError>;
}

/// Scorer backed by a vision model behind the LLM router
pub struct LlmFaceScorer {
    client: LLMClient,
    model: String,
}

impl LlmFaceScorer {
    pub fn new(client: LLMClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    async fn ask(
        &self,
        (system, user): (String, String),
        probe: &EncodedImage,
        reference: &EncodedImage,
        task: &str,
        max_tokens: u32,
    ) -> Result<String, ScorerError> {
        let parts = vec![
            ContentPart::text(user),
            ContentPart::text("IMAGE 1 (live capture):"),
            ContentPart::image(probe.as_data_uri()),
            ContentPart::text("IMAGE 2 (registered photo):"),
            ContentPart::image(reference.as_data_uri()),
        ];

        let options = VisionOptions {
            temperature: Some(0.0),
            max_tokens: Some(max_tokens),
        };

        let response = self
            .client
            .generate_vision(&self.model, &system, parts, task, options)
            .await
            .map_err(ScorerError::Request)?;

        debug!(
            "Scorer raw response ({}): {}",
            task,
            response.chars().take(200).collect::<String>()
        );
        Ok(response)
    }
}

#[async_trait]
impl FaceScorer for LlmFaceScorer {
    async fn score(
        &self,
        probe: &EncodedImage,
        reference: &EncodedImage,
    ) -> Result<f32, ScorerError> {
        let response = self
            .ask(
                build_similarity_prompt(),
                probe,
                reference,
                tasks::FACE_SIMILARITY,
                60,
            )
            .await?;
        parse_similarity_response(&response)
    }

    async fn confirm(
        &self,
        probe: &EncodedImage,
        reference: &EncodedImage,
    ) -> Result<bool, ScorerError> {
        let response = self
            .ask(
                build_confirmation_prompt(),
                probe,
                reference,
                tasks::FACE_CONFIRMATION,
                20,
            )
            .await?;
        parse_confirmation_response(&response)
    }
}

/// Build the prompt for the scoring call.
/// Returns (system_prompt, user_prompt_text).
pub(crate) fn build_similarity_prompt() -> (String, String) {
    let system = "You compare two photographs of human faces for an emergency medical \
        identification system. Judge only facial identity: ignore lighting, pose, \
        expression, glasses, hair style, background and image quality. \
        Respond ONLY with JSON: {\"confidence\": <integer 0-100>} where 100 means \
        certainly the same person and 0 means certainly different people. \
        If either image contains no visible face, respond {\"confidence\": 0}.";

    let user = "Are IMAGE 1 and IMAGE 2 the same person? Respond with the JSON object only.";

    (system.to_string(), user.to_string())
}

/// Build the prompt for the confirmatory call.
/// Returns (system_prompt, user_prompt_text).
pub(crate) fn build_confirmation_prompt() -> (String, String) {
    let system = "You are verifying a tentative face match before confidential medical \
        records are disclosed. A wrong YES exposes a stranger's records, so answer YES \
        only if you are certain both photographs show the same individual. \
        Respond with exactly one word: YES or NO.";

    let user = "Do IMAGE 1 and IMAGE 2 show the same person? Answer YES or NO.";

    (system.to_string(), user.to_string())
}

#[derive(Deserialize)]
struct SimilarityJson {
    #[serde(alias = "score", alias = "similarity")]
    confidence: f64,
}

#[derive(Deserialize)]
struct ConfirmationJson {
    #[serde(alias = "match", alias = "is_match", alias = "same")]
    same_person: bool,
}

/// Slice out the outermost `{...}` of a response, if any
fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&response[start..=end])
}

const SCORE_KEYWORDS: [&str; 3] = ["confidence", "score", "similarity"];

/// Signed decimal at the very start of `text`
fn leading_number(text: &str) -> Option<f64> {
    let end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && c == '-')))
        .map_or(text.len(), |(i, _)| i);
    text[..end].trim_end_matches('.').parse().ok()
}

/// Score from a free-text reply: either the whole reply is a number, or a
/// number directly follows one of the score keywords. Other digits (such as
/// the "IMAGE 2" label echoed back) are ignored.
fn labelled_number(text: &str) -> Option<f64> {
    let bare = text.trim().trim_end_matches(|c: char| c == '%' || c == '.');
    if let Ok(value) = bare.parse::<f64>() {
        return Some(value);
    }

    let lower = text.to_ascii_lowercase();
    SCORE_KEYWORDS.iter().find_map(|keyword| {
        lower.match_indices(keyword).find_map(|(pos, _)| {
            let rest = text[pos + keyword.len()..]
                .trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == '=' || c == '"');
            let rest = rest.strip_prefix("is").map_or(rest, str::trim_start);
            leading_number(rest)
        })
    })
}

/// Parse a similarity reply into a score clamped to [0, 100].
pub(crate) fn parse_similarity_response(response: &str) -> Result<f32, ScorerError> {
    let cleaned = response.trim();

    let value = match extract_json_object(cleaned) {
        Some(json) => serde_json::from_str::<SimilarityJson>(json)
            .map(|parsed| parsed.confidence)
            .map_err(|e| {
                ScorerError::InvalidResponse(format!("{} - Response: {}", e, json))
            })?,
        None => labelled_number(cleaned).ok_or_else(|| {
            ScorerError::InvalidResponse(format!("No score found in response: {}", cleaned))
        })?,
    };

    if !value.is_finite() {
        return Err(ScorerError::InvalidResponse(format!(
            "Score is not a finite number: {}",
            value
        )));
    }

    Ok((value as f32).clamp(SCORE_MIN, SCORE_MAX))
}

/// Parse a confirmation reply: JSON `{"same_person": bool}` or a leading YES / NO.
pub(crate) fn parse_confirmation_response(response: &str) -> Result<bool, ScorerError> {
    let cleaned = response.trim();

    if let Some(json) = extract_json_object(cleaned) {
        if let Ok(parsed) = serde_json::from_str::<ConfirmationJson>(json) {
            return Ok(parsed.same_person);
        }
    }

    let first_word: String = cleaned
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_uppercase();

    match first_word.as_str() {
        "YES" => Ok(true),
        "NO" => Ok(false),
        _ => Err(ScorerError::InvalidResponse(format!(
            "Expected YES or NO, got: {}",
            cleaned.chars().take(100).collect::<String>()
        ))),
    }
}
