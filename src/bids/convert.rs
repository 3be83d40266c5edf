use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::acquisition::{Acquisition, SIDECAR_EXTENSION, Sidecar, group_acquisitions};
use super::registry::{CollisionRegistry, Placement, Rename, SessionTarget};
use super::rules;
use crate::error::XnatcError;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    pub placed: Vec<PlacedAcquisition>,
    pub renamed: Vec<RenamedAcquisition>,
    pub unmatched: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedAcquisition {
    pub source: String,
    pub folder: String,
    pub base_name: String,
    pub extensions: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenamedAcquisition {
    pub folder: String,
    pub from: String,
    pub to: String,
}

/// Converts one scan's staged files into the session directory.
///
/// Acquisitions are processed one at a time in basename order. Problems
/// with a single acquisition are logged and recorded in the report; only a
/// staging directory that cannot be listed is an error.
pub fn convert_scan(
    staging: &Utf8Path,
    target: &SessionTarget,
    registry: &mut CollisionRegistry,
) -> Result<ConversionReport, XnatcError> {
    let names = list_file_names(staging)?;
    let grouping = group_acquisitions(names.iter().map(String::as_str));
    let mut report = ConversionReport::default();

    for stray in &grouping.strays {
        warn!("Unrecognized file: {stray} - removing from BIDS dataset");
        remove_quietly(&staging.join(stray));
    }

    for acquisition in &grouping.acquisitions {
        let sidecar = if acquisition.has_sidecar() {
            let path = staging.join(format!("{}{SIDECAR_EXTENSION}", acquisition.basename));
            Sidecar::load(path.as_std_path())
        } else {
            Sidecar::Absent
        };
        match &sidecar {
            Sidecar::Absent => warn!(
                "No sidecar metadata for {} - classifying by file name only",
                acquisition.basename
            ),
            Sidecar::Malformed(reason) => warn!(
                "Could not read sidecar metadata for {}: {reason}",
                acquisition.basename
            ),
            Sidecar::Present(_) => {}
        }

        let Some(classification) = rules::classify(&acquisition.basename, &sidecar) else {
            warn!(
                "Unmatched file: {} - removing from BIDS dataset",
                acquisition.basename
            );
            for name in acquisition.file_names() {
                remove_quietly(&staging.join(name));
            }
            report.unmatched.push(acquisition.basename.clone());
            continue;
        };

        let reservation = registry.reserve(
            target,
            classification.folder,
            classification.suffix,
            classification.attributes,
            acquisition.extensions.clone(),
        );

        for rename in &reservation.renames {
            match apply_rename(&target.dir, rename) {
                Ok(()) => {
                    debug!(
                        from = %rename.from.base_name,
                        to = %rename.to.base_name,
                        "renamed earlier acquisition after collision"
                    );
                    for placed in report
                        .placed
                        .iter_mut()
                        .filter(|placed| {
                            placed.folder == rename.from.folder
                                && placed.base_name == rename.from.base_name
                        })
                    {
                        placed.base_name = rename.to.base_name.clone();
                    }
                    report.renamed.push(RenamedAcquisition {
                        folder: rename.to.folder.clone(),
                        from: rename.from.base_name.clone(),
                        to: rename.to.base_name.clone(),
                    });
                }
                Err(err) => warn!(
                    "Failed to rename {} to {}: {err}",
                    rename.from.base_name, rename.to.base_name
                ),
            }
        }

        let placement = &reservation.placement;
        if let Err(err) = relocate(staging, acquisition, &target.dir, placement) {
            warn!("Failed to move {}: {err}", acquisition.basename);
            registry.release(&target.dir, placement);
            report.failed.push(acquisition.basename.clone());
            continue;
        }

        if !classification.sidecar_patch.is_empty() {
            if let Sidecar::Present(mut fields) = sidecar {
                fields.extend(classification.sidecar_patch);
                let path = placement.path(&target.dir, SIDECAR_EXTENSION);
                if let Err(err) = write_sidecar(&path, Value::Object(fields)) {
                    warn!("Failed to update sidecar {path}: {err}");
                }
            }
        }

        debug!(
            source = %acquisition.basename,
            folder = %placement.folder,
            name = %placement.base_name,
            "placed acquisition"
        );
        report.placed.push(PlacedAcquisition {
            source: acquisition.basename.clone(),
            folder: placement.folder.clone(),
            base_name: placement.base_name.clone(),
            extensions: placement.extensions.clone(),
        });
    }

    Ok(report)
}

/// Moves every staged file of `acquisition` to its destination. Sources are
/// all checked before the first move.
pub fn relocate(
    staging: &Utf8Path,
    acquisition: &Acquisition,
    session_dir: &Utf8Path,
    placement: &Placement,
) -> Result<Vec<Utf8PathBuf>, XnatcError> {
    let sources = acquisition
        .extensions
        .iter()
        .map(|ext| (staging.join(format!("{}{ext}", acquisition.basename)), *ext))
        .collect::<Vec<_>>();
    move_all(&sources, session_dir, placement)
}

/// Moves an already placed acquisition to its new name.
pub fn apply_rename(session_dir: &Utf8Path, rename: &Rename) -> Result<(), XnatcError> {
    let sources = rename
        .from
        .extensions
        .iter()
        .map(|ext| (rename.from.path(session_dir, ext), *ext))
        .collect::<Vec<_>>();
    move_all(&sources, session_dir, &rename.to).map(|_| ())
}

fn move_all(
    sources: &[(Utf8PathBuf, &'static str)],
    session_dir: &Utf8Path,
    placement: &Placement,
) -> Result<Vec<Utf8PathBuf>, XnatcError> {
    if let Some((missing, _)) = sources
        .iter()
        .find(|(path, _)| !path.as_std_path().exists())
    {
        return Err(XnatcError::Filesystem(format!("missing file {missing}")));
    }

    fs::create_dir_all(session_dir.join(&placement.folder).as_std_path())
        .map_err(|err| XnatcError::Filesystem(err.to_string()))?;

    let mut moved = Vec::with_capacity(sources.len());
    for (source, ext) in sources {
        let destination = placement.path(session_dir, ext);
        move_file(source, &destination)?;
        moved.push(destination);
    }
    Ok(moved)
}

fn move_file(source: &Utf8Path, destination: &Utf8Path) -> Result<(), XnatcError> {
    if fs::rename(source.as_std_path(), destination.as_std_path()).is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(source.as_std_path(), destination.as_std_path())
        .and_then(|_| fs::remove_file(source.as_std_path()))
        .map_err(|err| XnatcError::Filesystem(format!("move {source} -> {destination}: {err}")))
}

fn write_sidecar(path: &Utf8Path, value: Value) -> Result<(), XnatcError> {
    let content =
        serde_json::to_vec_pretty(&value).map_err(|err| XnatcError::Sidecar(err.to_string()))?;
    fs::write(path.as_std_path(), content).map_err(|err| XnatcError::Filesystem(err.to_string()))
}

fn list_file_names(dir: &Utf8Path) -> Result<Vec<String>, XnatcError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| XnatcError::Filesystem(format!("read {dir}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        if !entry.path().is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => warn!("Skipping non UTF-8 file name {name:?}"),
        }
    }
    names.sort();
    Ok(names)
}

fn remove_quietly(path: &Utf8Path) {
    if let Err(err) = fs::remove_file(path.as_std_path()) {
        warn!("Failed to remove {path}: {err}");
    }
}
