use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::BidsId;
use crate::error::XnatcError;

pub const BIDS_VERSION: &str = "1.8.0";
pub const PARTICIPANTS_FILE: &str = "participants.tsv";
pub const DESCRIPTION_FILE: &str = "dataset_description.json";
pub const README_FILE: &str = "README";

#[derive(Debug, Serialize)]
struct DatasetDescription<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "BIDSVersion")]
    bids_version: &'a str,
    #[serde(rename = "DatasetType")]
    dataset_type: &'a str,
}

/// Adds `sub-<subject>` to the participant list. Returns `false` when the
/// subject was already listed.
pub fn ensure_participant(project_dir: &Utf8Path, subject: &BidsId) -> Result<bool, XnatcError> {
    let path = project_dir.join(PARTICIPANTS_FILE);
    let participant = format!("sub-{subject}");

    let existing = if path.as_std_path().exists() {
        fs::read_to_string(path.as_std_path())
            .map_err(|err| XnatcError::Filesystem(err.to_string()))?
    } else {
        String::new()
    };
    let listed = existing
        .lines()
        .skip(1)
        .any(|line| line.split('\t').next() == Some(participant.as_str()));
    if listed {
        return Ok(false);
    }

    fs::create_dir_all(project_dir.as_std_path())
        .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    let mut content = String::new();
    if existing.is_empty() {
        content.push_str("participant_id\n");
    } else if !existing.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&participant);
    content.push('\n');
    file.write_all(content.as_bytes())
        .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    Ok(true)
}

pub fn ensure_dataset_description(project_dir: &Utf8Path, name: &str) -> Result<bool, XnatcError> {
    let description = DatasetDescription {
        name,
        bids_version: BIDS_VERSION,
        dataset_type: "raw",
    };
    let content = serde_json::to_vec_pretty(&description)
        .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    write_if_absent(&project_dir.join(DESCRIPTION_FILE), &content)
}

pub fn ensure_readme(
    project_dir: &Utf8Path,
    archive_url: &str,
    project: &str,
) -> Result<bool, XnatcError> {
    let content = format!(
        "BIDS dataset downloaded from XNAT\n\nArchive: {archive_url}\nProject: {project}\n"
    );
    write_if_absent(&project_dir.join(README_FILE), content.as_bytes())
}

fn write_if_absent(path: &Utf8Path, content: &[u8]) -> Result<bool, XnatcError> {
    if path.as_std_path().exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    }
    fs::write(path.as_std_path(), content).map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    Ok(true)
}
