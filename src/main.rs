use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use emergency_scan_lib::activity_log;
use emergency_scan_lib::capture::{CaptureSettings, StillImageCamera};
use emergency_scan_lib::config::Config;
use emergency_scan_lib::llm_client::LLMClient;
use emergency_scan_lib::matcher::{CancellationFlag, MatchPolicy};
use emergency_scan_lib::roster::{JsonRoster, RosterProvider};
use emergency_scan_lib::scorer::LlmFaceScorer;
use emergency_scan_lib::workflow::{ScanController, ScanOutcome};

/// Identify an unresponsive patient from a face photo and show their emergency information
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ~/.emergencyscan/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scan against the roster using a photo as the camera frame
    Scan {
        /// Photo to use as the live capture (JPEG or PNG)
        #[arg(short, long)]
        image: PathBuf,

        /// Roster file (overrides the configured roster)
        #[arg(short, long)]
        roster: Option<PathBuf>,

        /// Also print the per-candidate score trace as JSON
        #[arg(long)]
        report: bool,
    },
    /// Check the LLM router connection and roster
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    if let Err(e) = activity_log::init_logging(log_level) {
        activity_log::init_console_logging(log_level);
        warn!("File logging unavailable, using console only: {}", e);
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_or_default(),
    };
    config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;

    let client = LLMClient::new(
        &config.llm_router_url,
        &config.llm_api_key,
        &config.llm_client_id,
        Duration::from_secs(config.request_timeout_secs),
    )
    .map_err(anyhow::Error::msg)?;

    match args.command {
        Command::Scan {
            image,
            roster,
            report,
        } => run_scan(&config, client, image, roster, report).await,
        Command::Status => show_status(&config, client).await,
    }
}

async fn run_scan(
    config: &Config,
    client: LLMClient,
    image: PathBuf,
    roster: Option<PathBuf>,
    report: bool,
) -> Result<()> {
    let roster_path = match roster {
        Some(path) => path,
        None => config.get_roster_path()?,
    };
    if !roster_path.exists() {
        warn!("Roster file not found at {:?}, no patient can match", roster_path);
    }

    let cancel = CancellationFlag::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Received Ctrl+C, cancelling scan...");
        cancel_ctrlc.cancel();

        // Handler replaced SIGINT; a second Ctrl+C must still stop the process
        tokio::signal::ctrl_c().await.ok();
        warn!("Second Ctrl+C, exiting");
        std::process::exit(130);
    });

    let scorer = LlmFaceScorer::new(client, &config.vision_model);
    let mut controller = ScanController::new(
        Arc::new(scorer),
        Box::new(JsonRoster::new(roster_path)),
        MatchPolicy::from_config(config),
        CaptureSettings::from_config(config),
    )
    .with_cancellation(cancel);

    info!("Emergency scan starting...");
    let camera = StillImageCamera::new(image);

    let outcome = match controller.run_once(&camera).await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            println!("\nScan cancelled.");
            return Ok(());
        }
        Err(e) => bail!("{}", e),
    };

    println!("\n{}\n", outcome.render());

    if report {
        if let Some(trace) = controller.last_report() {
            println!("{}", serde_json::to_string_pretty(trace)?);
        }
    }

    if let ScanOutcome::Error(message) = outcome {
        bail!("{}", message);
    }
    Ok(())
}

async fn show_status(config: &Config, client: LLMClient) -> Result<()> {
    println!("LLM router: {}", client.base_url());
    let status = client.check_status().await;
    if status.connected {
        println!("  Connected ({} models)", status.available_models.len());
        let model_listed = status
            .available_models
            .iter()
            .any(|m| m == &config.vision_model);
        if model_listed {
            println!("  Vision model: {}", config.vision_model);
        } else {
            println!("  Vision model: {} (not listed by router)", config.vision_model);
        }
    } else {
        println!(
            "  Not connected: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let roster = JsonRoster::new(config.get_roster_path()?);
    println!("Roster: {:?}", roster.path());
    match roster.candidates() {
        Ok(candidates) => {
            let with_photo = candidates
                .iter()
                .filter(|c| c.usable_reference().is_some())
                .count();
            println!(
                "  {} patients, {} with a usable reference photo",
                candidates.len(),
                with_photo
            );
        }
        Err(e) => println!("  Unreadable: {:#}", e),
    }

    println!(
        "Thresholds: high confidence {:.0}, minimum {:.0}",
        config.high_confidence_threshold, config.minimum_confidence_threshold
    );
    Ok(())
}
