//! Match-selection policy.
//!
//! Given a probe image and the ordered roster, decide which single candidate
//! (if any) is the verified match. Scores come from an external `FaceScorer`;
//! the policy only applies two thresholds:
//!
//! 1. Candidates are scored one at a time, in roster order. A score at or above
//!    the high-confidence threshold returns that candidate immediately and no
//!    later candidate is scored.
//! 2. Otherwise the best-scoring candidate (earliest wins ties) is re-checked
//!    with the scorer's binary confirmation call, provided its score reaches
//!    the minimum threshold. Only an affirmative answer produces a match.
//!
//! Per-candidate scorer failures are logged and skipped. A failed confirmation
//! counts as a negative one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::activity_log;
use crate::config::Config;
use crate::encoded_image::EncodedImage;
use crate::roster::CandidateRecord;
use crate::scorer::{FaceScorer, SCORE_MAX, SCORE_MIN};

/// Score at or above which a candidate is accepted without confirmation
pub const DEFAULT_HIGH_CONFIDENCE: f32 = 95.0;

/// Score the best candidate must reach before it is sent for confirmation
pub const DEFAULT_MINIMUM_CONFIDENCE: f32 = 75.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Scan was cancelled")]
    Cancelled,
}

/// Cooperative cancellation shared between the caller and an in-flight request
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every task waiting in `cancelled`
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set. Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Clear a previous cancellation so the flag can guard a new request
    pub fn reset(&self) {
        self.0.cancelled.store(false, Ordering::SeqCst);
    }
}

/// How a matched verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    /// Score reached the high-confidence threshold
    HighConfidence,
    /// Best candidate passed the confirmatory check
    Confirmed,
}

impl MatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStage::HighConfidence => "high_confidence",
            MatchStage::Confirmed => "confirmed",
        }
    }
}

/// Final decision for one recognition request
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Matched {
        candidate: CandidateRecord,
        score: f32,
        stage: MatchStage,
    },
    NoMatch,
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Matched { .. })
    }

    pub fn candidate(&self) -> Option<&CandidateRecord> {
        match self {
            Verdict::Matched { candidate, .. } => Some(candidate),
            Verdict::NoMatch => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Affirmed,
    Rejected,
    Failed,
}

impl ConfirmationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationOutcome::Affirmed => "affirmed",
            ConfirmationOutcome::Rejected => "rejected",
            ConfirmationOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub candidate_id: String,
    pub score: f32,
}

/// Trace of one request. Holds candidate IDs only, never names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub scores: Vec<CandidateScore>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub confirmation: Option<ConfirmationOutcome>,
}

impl MatchReport {
    fn new(scan_id: String) -> Self {
        Self {
            scan_id,
            started_at: Utc::now(),
            scores: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            confirmation: None,
        }
    }

    /// Number of scoring calls issued (successful or not), excluding confirmation
    pub fn scorer_calls(&self) -> usize {
        self.scores.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub verdict: Verdict,
    pub report: MatchReport,
}

/// Two-threshold match selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub high_confidence: f32,
    pub minimum_confidence: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            high_confidence: DEFAULT_HIGH_CONFIDENCE,
            minimum_confidence: DEFAULT_MINIMUM_CONFIDENCE,
        }
    }
}

impl MatchPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            high_confidence: config.high_confidence_threshold,
            minimum_confidence: config.minimum_confidence_threshold,
        }
    }

    /// Run the policy over `candidates` in order.
    ///
    /// Scorer calls are strictly sequential. Each call is raced against
    /// `cancel`; once it is set the in-flight call is dropped and the request
    /// ends with `MatchError::Cancelled`.
    pub async fn select_match(
        &self,
        scorer: &dyn FaceScorer,
        probe: EncodedImage,
        candidates: &[CandidateRecord],
        cancel: &CancellationFlag,
    ) -> Result<MatchOutcome, MatchError> {
        let scan_id = Uuid::new_v4().to_string();
        let mut report = MatchReport::new(scan_id.clone());

        activity_log::log_scan_start(&scan_id, candidates.len(), probe.byte_len());

        if candidates.is_empty() {
            return Ok(finish(Verdict::NoMatch, report));
        }

        let mut best: Option<(&CandidateRecord, f32, EncodedImage)> = None;

        for candidate in candidates {
            let Some(reference) = candidate.usable_reference() else {
                activity_log::log_candidate_skipped(&scan_id, &candidate.id);
                report.skipped.push(candidate.id.clone());
                continue;
            };

            if cancel.is_cancelled() {
                activity_log::log_scan_cancelled(&scan_id, report.scorer_calls());
                return Err(MatchError::Cancelled);
            }

            let start = Instant::now();
            let scored = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = scorer.score(&probe, &reference) => Some(result),
            };
            let Some(scored) = scored else {
                activity_log::log_scan_cancelled(&scan_id, report.scorer_calls() + 1);
                return Err(MatchError::Cancelled);
            };
            let score = match scored {
                Ok(score) if score.is_finite() => score.clamp(SCORE_MIN, SCORE_MAX),
                Ok(score) => {
                    let message = format!("Scorer returned a non-finite score: {}", score);
                    activity_log::log_scorer_failure(&scan_id, &candidate.id, &message);
                    report.failed.push(candidate.id.clone());
                    continue;
                }
                Err(e) => {
                    activity_log::log_scorer_failure(&scan_id, &candidate.id, &e.to_string());
                    report.failed.push(candidate.id.clone());
                    continue;
                }
            };
            activity_log::log_candidate_scored(
                &scan_id,
                &candidate.id,
                score,
                start.elapsed().as_millis() as u64,
            );
            report.scores.push(CandidateScore {
                candidate_id: candidate.id.clone(),
                score,
            });

            if score >= self.high_confidence {
                let verdict = Verdict::Matched {
                    candidate: candidate.clone(),
                    score,
                    stage: MatchStage::HighConfidence,
                };
                return Ok(finish(verdict, report));
            }

            let is_better = best.as_ref().map_or(true, |(_, best_score, _)| score > *best_score);
            if is_better {
                best = Some((candidate, score, reference));
            }
        }

        let (candidate, score, reference) = match best {
            Some(best) if best.1 >= self.minimum_confidence => best,
            Some((candidate, score, _)) => {
                debug!(
                    "Best candidate {} scored {:.1}, below minimum {:.1}",
                    candidate.id, score, self.minimum_confidence
                );
                return Ok(finish(Verdict::NoMatch, report));
            }
            None => return Ok(finish(Verdict::NoMatch, report)),
        };

        let confirmed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = scorer.confirm(&probe, &reference) => Some(result),
        };
        let Some(confirmed) = confirmed else {
            activity_log::log_scan_cancelled(&scan_id, report.scorer_calls() + 1);
            return Err(MatchError::Cancelled);
        };

        let confirmation = match confirmed {
            Ok(true) => ConfirmationOutcome::Affirmed,
            Ok(false) => ConfirmationOutcome::Rejected,
            Err(e) => {
                activity_log::log_scorer_failure(&scan_id, &candidate.id, &e.to_string());
                ConfirmationOutcome::Failed
            }
        };
        activity_log::log_confirmation(&scan_id, &candidate.id, confirmation.as_str());
        report.confirmation = Some(confirmation);

        let verdict = if confirmation == ConfirmationOutcome::Affirmed {
            Verdict::Matched {
                candidate: candidate.clone(),
                score,
                stage: MatchStage::Confirmed,
            }
        } else {
            Verdict::NoMatch
        };
        Ok(finish(verdict, report))
    }
}

fn finish(verdict: Verdict, report: MatchReport) -> MatchOutcome {
    let (matched_id, stage) = match &verdict {
        Verdict::Matched {
            candidate, stage, ..
        } => (Some(candidate.id.as_str()), Some(stage.as_str())),
        Verdict::NoMatch => (None, None),
    };
    activity_log::log_verdict(&report.scan_id, matched_id, stage, report.scorer_calls());
    MatchOutcome { verdict, report }
}
