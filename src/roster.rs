//! Patient roster: the candidate records a scan is matched against.
//!
//! The roster is owned by the surrounding application. A scan only takes a
//! point-in-time snapshot through `RosterProvider` and never writes back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::encoded_image::EncodedImage;

/// Current schema version for roster storage
const SCHEMA_VERSION: u32 = 1;

/// Person to call in an emergency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: String,
}

/// Emergency medical data revealed on a successful match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyInfo {
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub emergency_contact: Option<EmergencyContact>,
    #[serde(default)]
    pub notes: String,
}

impl EmergencyInfo {
    /// Human-readable lines for the result screen
    pub fn summary_lines(&self) -> Vec<String> {
        fn list(items: &[String]) -> String {
            if items.is_empty() {
                "None recorded".to_string()
            } else {
                items.join(", ")
            }
        }

        let mut lines = vec![
            format!(
                "Blood type: {}",
                self.blood_type.as_deref().unwrap_or("Unknown")
            ),
            format!("Allergies: {}", list(&self.allergies)),
            format!("Medications: {}", list(&self.medications)),
            format!("Conditions: {}", list(&self.conditions)),
        ];

        match &self.emergency_contact {
            Some(contact) if contact.relationship.is_empty() => {
                lines.push(format!("Emergency contact: {} ({})", contact.name, contact.phone));
            }
            Some(contact) => lines.push(format!(
                "Emergency contact: {} - {} ({})",
                contact.name, contact.relationship, contact.phone
            )),
            None => lines.push("Emergency contact: None recorded".to_string()),
        }

        if !self.notes.trim().is_empty() {
            lines.push(format!("Notes: {}", self.notes.trim()));
        }

        lines
    }
}

/// One registered patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub name: String,
    /// Reference photo as a data URI. Absent when the patient was enrolled without one.
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub emergency: EmergencyInfo,
}

impl CandidateRecord {
    pub fn new(id: &str, name: &str, reference_image: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            reference_image,
            emergency: EmergencyInfo::default(),
        }
    }

    /// The reference photo, if present and decodable as an image data URI
    pub fn usable_reference(&self) -> Option<EncodedImage> {
        let raw = self.reference_image.as_deref()?;
        match EncodedImage::parse(raw) {
            Ok(image) => Some(image),
            Err(e) => {
                debug!("Candidate {} has an unusable reference image: {}", self.id, e);
                None
            }
        }
    }
}

/// Supplies the ordered candidate sequence for one recognition request
pub trait RosterProvider {
    fn candidates(&self) -> Result<Vec<CandidateRecord>>;
}

impl RosterProvider for Vec<CandidateRecord> {
    fn candidates(&self) -> Result<Vec<CandidateRecord>> {
        Ok(self.clone())
    }
}

/// Storage container with schema versioning
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RosterFile {
    schema_version: u32,
    #[serde(default)]
    patients: Vec<CandidateRecord>,
}

/// Roster read from a JSON file on every request
#[derive(Debug, Clone)]
pub struct JsonRoster {
    path: PathBuf,
}

impl JsonRoster {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<RosterFile> {
        if !self.path.exists() {
            debug!("No roster file found at {:?}, using empty roster", self.path);
            return Ok(RosterFile {
                schema_version: SCHEMA_VERSION,
                patients: Vec::new(),
            });
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read roster from {:?}", self.path))?;
        let file: RosterFile =
            serde_json::from_str(&content).with_context(|| "Failed to parse roster JSON")?;

        if file.schema_version != SCHEMA_VERSION {
            warn!(
                "Roster schema version mismatch: {} vs {}, may need migration",
                file.schema_version, SCHEMA_VERSION
            );
        }

        Ok(file)
    }
}

impl RosterProvider for JsonRoster {
    fn candidates(&self) -> Result<Vec<CandidateRecord>> {
        let file = self.read()?;
        let with_photo = file
            .patients
            .iter()
            .filter(|p| p.reference_image.is_some())
            .count();
        info!(
            "Loaded {} roster entries ({} with photos) from {:?}",
            file.patients.len(),
            with_photo,
            self.path
        );
        Ok(file.patients)
    }
}
