pub mod activity_log;
pub mod capture;
pub mod config;
pub mod encoded_image;
pub mod llm_client;
pub mod matcher;
pub mod roster;
pub mod scorer;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

pub use capture::{CameraDevice, CaptureSettings, CaptureWidget, StillImageCamera};
pub use config::Config;
pub use encoded_image::EncodedImage;
pub use matcher::{CancellationFlag, MatchPolicy, Verdict};
pub use roster::{CandidateRecord, JsonRoster, RosterProvider};
pub use scorer::{FaceScorer, LlmFaceScorer};
pub use workflow::{ScanController, ScanOutcome, ScanState};
