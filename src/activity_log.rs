//! Activity Logging Module
//!
//! Provides structured activity logging for auditing scan requests.
//! IMPORTANT: This module must NEVER log PHI (Protected Health Information).
//!
//! What IS logged:
//! - Scan IDs and roster candidate IDs
//! - Scores, thresholds and scorer call counts
//! - Workflow state transitions and outcomes
//! - Error messages (sanitized)
//!
//! What is NOT logged:
//! - Patient names
//! - Emergency medical data
//! - Image payloads

use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Guard that must be held for the duration of the application
/// to ensure logs are flushed before exit
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the activity logging system
///
/// Sets up dual logging:
/// - Console output (human-readable, filtered by `RUST_LOG` or `default_level`)
/// - File output (JSON, for auditing), in ~/.emergencyscan/logs/ with daily rotation
pub fn init_logging(default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "activity.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    info!(
        event = "logging_initialized",
        log_dir = %log_dir.display(),
        "Activity logging system initialized"
    );

    Ok(())
}

/// Console-only logging, used when the log directory is unavailable
pub fn init_console_logging(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .try_init();
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let home = dirs::home_dir().ok_or("Could not determine home directory")?;
    Ok(home.join(".emergencyscan").join("logs"))
}

// ============================================================================
// Match Policy Events
// ============================================================================

pub fn log_scan_start(scan_id: &str, candidate_count: usize, probe_bytes: usize) {
    info!(
        event = "scan_start",
        scan_id = %scan_id,
        candidate_count = candidate_count,
        probe_bytes = probe_bytes,
        "Recognition request started"
    );
}

pub fn log_candidate_skipped(scan_id: &str, candidate_id: &str) {
    info!(
        event = "candidate_skipped",
        scan_id = %scan_id,
        candidate_id = %candidate_id,
        "Candidate has no usable reference image"
    );
}

pub fn log_candidate_scored(scan_id: &str, candidate_id: &str, score: f32, latency_ms: u64) {
    info!(
        event = "candidate_scored",
        scan_id = %scan_id,
        candidate_id = %candidate_id,
        score = score,
        latency_ms = latency_ms,
        "Candidate scored"
    );
}

pub fn log_scorer_failure(scan_id: &str, candidate_id: &str, error: &str) {
    warn!(
        event = "scorer_failure",
        scan_id = %scan_id,
        candidate_id = %candidate_id,
        error = %error,
        "Scorer call failed, continuing with next candidate"
    );
}

pub fn log_confirmation(scan_id: &str, candidate_id: &str, outcome: &str) {
    info!(
        event = "confirmation",
        scan_id = %scan_id,
        candidate_id = %candidate_id,
        outcome = %outcome,
        "Confirmatory check finished"
    );
}

pub fn log_verdict(scan_id: &str, matched_id: Option<&str>, stage: Option<&str>, scorer_calls: usize) {
    info!(
        event = "verdict",
        scan_id = %scan_id,
        matched = matched_id.is_some(),
        candidate_id = matched_id,
        stage = stage,
        scorer_calls = scorer_calls,
        "Recognition request finished"
    );
}

pub fn log_scan_cancelled(scan_id: &str, scorer_calls: usize) {
    info!(
        event = "scan_cancelled",
        scan_id = %scan_id,
        scorer_calls = scorer_calls,
        "Recognition request cancelled"
    );
}

// ============================================================================
// Workflow Events
// ============================================================================

pub fn log_workflow_transition(from: &str, to: &str, trigger: &str) {
    info!(
        event = "workflow_transition",
        from = %from,
        to = %to,
        trigger = %trigger,
        "Scan workflow state changed"
    );
}

pub fn log_camera_event(action: &str, detail: Option<&str>) {
    info!(
        event = "camera",
        action = %action,
        detail = detail,
        "Camera event"
    );
}
