//! Scan workflow: initial → capturing → processing → result.
//!
//! `ScanState` is the pure state machine; `ScanController` drives one attempt
//! at a time through it, owning the scorer, the roster provider and the
//! cancellation handle for the in-flight request.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::activity_log;
use crate::capture::{CameraDevice, CaptureError, CaptureSettings, CaptureState, CaptureWidget};
use crate::encoded_image::EncodedImage;
use crate::matcher::{CancellationFlag, MatchError, MatchPolicy, MatchReport, MatchStage, Verdict};
use crate::roster::{CandidateRecord, RosterProvider};
use crate::scorer::FaceScorer;

/// What the result screen shows
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Matched {
        candidate: CandidateRecord,
        score: f32,
        stage: MatchStage,
    },
    NoMatch,
    /// The recognition request failed; the message is shown as-is
    Error(String),
}

impl ScanOutcome {
    fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Matched {
                candidate,
                score,
                stage,
            } => ScanOutcome::Matched {
                candidate,
                score,
                stage,
            },
            Verdict::NoMatch => ScanOutcome::NoMatch,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScanOutcome::Matched { .. } => "matched",
            ScanOutcome::NoMatch => "no_match",
            ScanOutcome::Error(_) => "error",
        }
    }

    /// Text for the result screen
    pub fn render(&self) -> String {
        match self {
            ScanOutcome::Matched { candidate, .. } => {
                let mut lines = vec![
                    "PATIENT IDENTIFIED".to_string(),
                    format!("Name: {}", candidate.name),
                ];
                lines.extend(candidate.emergency.summary_lines());
                lines.join("\n")
            }
            ScanOutcome::NoMatch => {
                "No matching patient found. Try again or identify the patient manually.".to_string()
            }
            ScanOutcome::Error(message) => format!("Scan failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Initial,
    Capturing,
    Processing,
    Result(ScanOutcome),
}

impl ScanState {
    pub fn name(&self) -> &'static str {
        match self {
            ScanState::Initial => "initial",
            ScanState::Capturing => "capturing",
            ScanState::Processing => "processing",
            ScanState::Result(_) => "result",
        }
    }

    /// Apply `event`, returning the next state. Illegal pairs are rejected.
    pub fn transition(&self, event: ScanEvent) -> Result<ScanState, WorkflowError> {
        let event_name = event.name();
        let next = match (self, event) {
            (ScanState::Initial, ScanEvent::Start) => ScanState::Capturing,
            (ScanState::Capturing, ScanEvent::ImageCaptured) => ScanState::Processing,
            (ScanState::Capturing, ScanEvent::Cancel) => ScanState::Initial,
            (ScanState::Processing, ScanEvent::Cancel) => ScanState::Initial,
            (ScanState::Processing, ScanEvent::PolicyResolved(outcome)) => ScanState::Result(outcome),
            (ScanState::Result(_), ScanEvent::Reset) => ScanState::Initial,
            _ => {
                return Err(WorkflowError::InvalidTransition {
                    state: self.name(),
                    event: event_name,
                })
            }
        };
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Start,
    ImageCaptured,
    Cancel,
    PolicyResolved(ScanOutcome),
    Reset,
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::Start => "start",
            ScanEvent::ImageCaptured => "image_captured",
            ScanEvent::Cancel => "cancel",
            ScanEvent::PolicyResolved(_) => "policy_resolved",
            ScanEvent::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("Invalid state transition: {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),
}

/// Failures that end a recognition request and surface as the error outcome
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Could not load the patient roster: {0}")]
    Roster(String),
    #[error(transparent)]
    Match(#[from] MatchError),
}

pub struct ScanController {
    state: ScanState,
    scorer: Arc<dyn FaceScorer>,
    roster: Box<dyn RosterProvider + Send + Sync>,
    policy: MatchPolicy,
    capture_settings: CaptureSettings,
    cancel: CancellationFlag,
    last_report: Option<MatchReport>,
}

impl ScanController {
    pub fn new(
        scorer: Arc<dyn FaceScorer>,
        roster: Box<dyn RosterProvider + Send + Sync>,
        policy: MatchPolicy,
        capture_settings: CaptureSettings,
    ) -> Self {
        Self {
            state: ScanState::Initial,
            scorer,
            roster,
            policy,
            capture_settings,
            cancel: CancellationFlag::new(),
            last_report: None,
        }
    }

    /// Share an externally owned cancellation flag, e.g. one tripped by Ctrl+C
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Trace of the current attempt's recognition request, if the policy
    /// finished. Cleared on every start.
    pub fn last_report(&self) -> Option<&MatchReport> {
        self.last_report.as_ref()
    }

    /// Handle that aborts the request currently in processing. The same flag
    /// guards every attempt; it is cleared on each start.
    pub fn cancellation_handle(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    fn apply(&mut self, event: ScanEvent) -> Result<(), WorkflowError> {
        let trigger = event.name();
        let next = self.state.transition(event)?;
        activity_log::log_workflow_transition(self.state.name(), next.name(), trigger);
        self.state = next;
        Ok(())
    }

    /// initial → capturing: mount the capture widget
    pub async fn start(&mut self, device: &dyn CameraDevice) -> Result<CaptureWidget, WorkflowError> {
        self.apply(ScanEvent::Start)?;
        self.cancel.reset();
        self.last_report = None;
        Ok(CaptureWidget::mount(device, self.capture_settings).await)
    }

    /// capturing → initial without ever contacting the scorer
    pub fn cancel_capture(&mut self, widget: CaptureWidget) -> Result<(), WorkflowError> {
        self.apply(ScanEvent::Cancel)?;
        widget.cancel();
        Ok(())
    }

    /// Capture a still and run the match policy.
    ///
    /// Returns `Ok(None)` when the request was cancelled (state back to
    /// initial). A failed capture also returns the controller to initial.
    pub async fn submit(&mut self, widget: CaptureWidget) -> Result<Option<ScanOutcome>, WorkflowError> {
        if self.state != ScanState::Capturing {
            return Err(WorkflowError::InvalidTransition {
                state: self.state.name(),
                event: ScanEvent::ImageCaptured.name(),
            });
        }

        let probe = match widget.capture() {
            Ok(probe) => probe,
            Err(e) => {
                self.apply(ScanEvent::Cancel)?;
                return Err(e.into());
            }
        };
        self.apply(ScanEvent::ImageCaptured)?;

        let outcome = match self.recognize(probe).await {
            Ok((verdict, report)) => {
                self.last_report = Some(report);
                ScanOutcome::from_verdict(verdict)
            }
            Err(ScanError::Match(MatchError::Cancelled)) => {
                info!("Scan cancelled while processing");
                self.apply(ScanEvent::Cancel)?;
                return Ok(None);
            }
            Err(e) => {
                error!("Scan failed: {}", e);
                ScanOutcome::Error(e.to_string())
            }
        };

        self.apply(ScanEvent::PolicyResolved(outcome.clone()))?;
        Ok(Some(outcome))
    }

    async fn recognize(
        &self,
        probe: EncodedImage,
    ) -> Result<(Verdict, MatchReport), ScanError> {
        let candidates = self
            .roster
            .candidates()
            .map_err(|e| ScanError::Roster(format!("{:#}", e)))?;

        let outcome = self
            .policy
            .select_match(self.scorer.as_ref(), probe, &candidates, &self.cancel)
            .await?;
        Ok((outcome.verdict, outcome.report))
    }

    /// result → initial
    pub fn reset(&mut self) -> Result<(), WorkflowError> {
        self.apply(ScanEvent::Reset)
    }

    /// Drive one full attempt: mount, capture, match.
    ///
    /// If the camera is unavailable the attempt is cancelled and the capture
    /// error returned.
    pub async fn run_once(&mut self, device: &dyn CameraDevice) -> Result<Option<ScanOutcome>, WorkflowError> {
        let widget = self.start(device).await?;
        if let CaptureState::Denied(reason) = widget.state().clone() {
            self.cancel_capture(widget)?;
            return Err(WorkflowError::Capture(reason));
        }
        self.submit(widget).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::EmergencyInfo;

    fn matched() -> ScanOutcome {
        let mut candidate = CandidateRecord::new("p1", "Ada Lovelace", None);
        candidate.emergency = EmergencyInfo {
            blood_type: Some("B+".to_string()),
            ..EmergencyInfo::default()
        };
        ScanOutcome::Matched {
            candidate,
            score: 97.0,
            stage: MatchStage::HighConfidence,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let state = ScanState::Initial;
        let state = state.transition(ScanEvent::Start).unwrap();
        assert_eq!(state, ScanState::Capturing);
        let state = state.transition(ScanEvent::ImageCaptured).unwrap();
        assert_eq!(state, ScanState::Processing);
        let state = state.transition(ScanEvent::PolicyResolved(ScanOutcome::NoMatch)).unwrap();
        assert_eq!(state, ScanState::Result(ScanOutcome::NoMatch));
        let state = state.transition(ScanEvent::Reset).unwrap();
        assert_eq!(state, ScanState::Initial);
    }

    #[test]
    fn test_cancel_transitions() {
        assert_eq!(
            ScanState::Capturing.transition(ScanEvent::Cancel).unwrap(),
            ScanState::Initial
        );
        assert_eq!(
            ScanState::Processing.transition(ScanEvent::Cancel).unwrap(),
            ScanState::Initial
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let cases = vec![
            (ScanState::Initial, ScanEvent::ImageCaptured),
            (ScanState::Initial, ScanEvent::Cancel),
            (ScanState::Initial, ScanEvent::Reset),
            (ScanState::Initial, ScanEvent::PolicyResolved(ScanOutcome::NoMatch)),
            (ScanState::Capturing, ScanEvent::Start),
            (ScanState::Capturing, ScanEvent::Reset),
            (ScanState::Capturing, ScanEvent::PolicyResolved(ScanOutcome::NoMatch)),
            (ScanState::Processing, ScanEvent::Start),
            (ScanState::Processing, ScanEvent::ImageCaptured),
            (ScanState::Processing, ScanEvent::Reset),
            (ScanState::Result(ScanOutcome::NoMatch), ScanEvent::Start),
            (ScanState::Result(ScanOutcome::NoMatch), ScanEvent::Cancel),
        ];
        for (state, event) in cases {
            let label = format!("{} + {}", state.name(), event.name());
            let err = state.transition(event).unwrap_err();
            assert!(
                matches!(err, WorkflowError::InvalidTransition { .. }),
                "{} should be rejected",
                label
            );
        }
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = ScanState::Initial.transition(ScanEvent::Reset).unwrap_err();
        assert_eq!(err.to_string(), "Invalid state transition: reset while initial");
    }

    #[test]
    fn test_render_matched() {
        let text = matched().render();
        assert!(text.starts_with("PATIENT IDENTIFIED"));
        assert!(text.contains("Name: Ada Lovelace"));
        assert!(text.contains("Blood type: B+"));
    }

    #[test]
    fn test_render_no_match_and_error() {
        assert!(ScanOutcome::NoMatch.render().contains("No matching patient"));
        assert_eq!(
            ScanOutcome::Error("router unreachable".to_string()).render(),
            "Scan failed: router unreachable"
        );
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(matched().name(), "matched");
        assert_eq!(ScanOutcome::NoMatch.name(), "no_match");
        assert_eq!(ScanOutcome::Error(String::new()).name(), "error");
    }
}
