use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::Serialize;
use tempfile::Builder;
use tracing::{info, warn};

use crate::bids::dataset::{ensure_dataset_description, ensure_participant, ensure_readme};
use crate::bids::{CollisionRegistry, ConversionReport, SessionTarget, convert_scan};
use crate::config::{DownloadPlan, ResolvedConfig, UploadPlan};
use crate::domain::{BidsId, DownloadFormat, HIERARCHY, Level, RemoteNode};
use crate::error::XnatcError;
use crate::fs_util::extract_zip_flat;
use crate::select::Matcher;
use crate::xnat::XnatClient;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub visited: Vec<VisitedNode>,
    pub downloads: Vec<DownloadItem>,
    pub uploads: Vec<UploadItem>,
    pub assessors_created: Vec<String>,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitedNode {
    pub level: Level,
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub node: String,
    pub resource: String,
    pub format: DownloadFormat,
    pub destination: String,
    pub files: usize,
    pub conversion: Option<ConversionReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadItem {
    pub node: String,
    pub source: String,
    pub resource: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub depth: usize,
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// The four nodes above and including a leaf.
struct LeafPath<'a> {
    project: &'a RemoteNode,
    subject: &'a RemoteNode,
    experiment: &'a RemoteNode,
    leaf: &'a RemoteNode,
}

impl<'a> LeafPath<'a> {
    fn from_slice(path: &'a [RemoteNode]) -> Result<Self, XnatcError> {
        match path {
            [project, subject, experiment, leaf] => Ok(Self {
                project,
                subject,
                experiment,
                leaf,
            }),
            _ => Err(XnatcError::XnatResponse(format!(
                "unexpected hierarchy depth {}",
                path.len()
            ))),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.project.label, self.subject.label, self.experiment.label, self.leaf.label
        )
    }
}

struct RunState {
    registry: CollisionRegistry,
    result: RunResult,
}

pub struct App<C: XnatClient> {
    client: C,
    config: ResolvedConfig,
}

impl<C: XnatClient> App<C> {
    pub fn new(client: C, config: ResolvedConfig) -> Self {
        Self { client, config }
    }

    /// Walks the selected part of the hierarchy and applies the configured
    /// download, upload and assessor-creation actions. Failures on a single
    /// scan or assessor are logged and recorded; listing failures abort.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunResult, XnatcError> {
        let mut state = RunState {
            registry: CollisionRegistry::new(),
            result: RunResult::default(),
        };
        sink.event(ProgressEvent {
            depth: 0,
            message: format!("Xnat: {}", self.config.host),
        });
        let mut path = Vec::new();
        self.visit_children(None, &mut path, &mut state, sink)?;

        if let Some(plan) = &self.config.download {
            info!("Data downloaded to {}", plan.dir.display());
        }
        Ok(state.result)
    }

    fn visit_children(
        &self,
        parent: Option<&RemoteNode>,
        path: &mut Vec<RemoteNode>,
        state: &mut RunState,
        sink: &dyn ProgressSink,
    ) -> Result<(), XnatcError> {
        let Some(levels) = HIERARCHY.get(path.len()) else {
            return Ok(());
        };
        for level in levels.iter() {
            let matcher = self.config.selection.matcher(*level);
            if matches!(matcher, Matcher::Skip) {
                continue;
            }
            let children = self.client.list_children(parent, *level)?;
            for child in children {
                if matcher.matches_node(&child) {
                    self.visit(child, path, state, sink)?;
                }
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: RemoteNode,
        path: &mut Vec<RemoteNode>,
        state: &mut RunState,
        sink: &dyn ProgressSink,
    ) -> Result<(), XnatcError> {
        sink.event(ProgressEvent {
            depth: path.len() + 1,
            message: format!("{}: {}", node.level, node.label),
        });
        state.result.visited.push(VisitedNode {
            level: node.level,
            id: node.id.clone(),
            label: node.label.clone(),
        });

        path.push(node);
        let outcome = self.visit_pushed(path, state, sink);
        path.pop();
        outcome
    }

    fn visit_pushed(
        &self,
        path: &mut Vec<RemoteNode>,
        state: &mut RunState,
        sink: &dyn ProgressSink,
    ) -> Result<(), XnatcError> {
        let Some(node) = path.last().cloned() else {
            return Ok(());
        };

        if node.level.is_leaf() {
            self.process_leaf(path, state, sink);
            return Ok(());
        }

        if node.level == Level::Experiment {
            if let Some(xml) = &self.config.create_assessor {
                sink.event(ProgressEvent {
                    depth: path.len(),
                    message: format!(" - Creating new assessor using XML: {}", xml.display()),
                });
                match self.client.create_assessor(&node, xml) {
                    Ok(()) => state.result.assessors_created.push(node.label.clone()),
                    Err(err) => {
                        warn!("Failed to create assessor on {}: {err}", node.label);
                        state.result.failures.push(node.label.clone());
                    }
                }
                return Ok(());
            }
        }

        self.visit_children(Some(&node), path, state, sink)
    }

    fn process_leaf(&self, path: &[RemoteNode], state: &mut RunState, sink: &dyn ProgressSink) {
        let leaf_path = match LeafPath::from_slice(path) {
            Ok(leaf_path) => leaf_path,
            Err(err) => {
                warn!("{err}");
                return;
            }
        };
        let leaf = leaf_path.leaf;

        if let Some(plan) = &self.config.download {
            match self.client.list_resources(leaf) {
                Ok(resources) if resources.iter().any(|label| *label == plan.resource) => {
                    match self.download(&leaf_path, plan, &mut state.registry) {
                        Ok(item) => state.result.downloads.push(item),
                        Err(err) => {
                            warn!(
                                "Failed to download resource {} from {} {}: {err}",
                                plan.resource, leaf.level, leaf.label
                            );
                            state.result.failures.push(leaf_path.describe());
                        }
                    }
                }
                Ok(_) => warn!(
                    "{} {} does not have an associated resource named {}",
                    leaf.level, leaf.label, plan.resource
                ),
                Err(err) => {
                    warn!("Failed to list resources of {} {}: {err}", leaf.level, leaf.label);
                    state.result.failures.push(leaf_path.describe());
                }
            }
        }

        if let Some(plan) = &self.config.upload {
            self.upload(&leaf_path, plan, path.len(), state, sink);
        }
    }

    fn download(
        &self,
        leaf_path: &LeafPath<'_>,
        plan: &DownloadPlan,
        registry: &mut CollisionRegistry,
    ) -> Result<DownloadItem, XnatcError> {
        let root = Utf8PathBuf::from_path_buf(plan.dir.clone())
            .map_err(|_| XnatcError::Filesystem("download path is not UTF-8".to_string()))?;
        let scratch = tempfile::tempdir().map_err(|err| XnatcError::Filesystem(err.to_string()))?;
        let zip_path = scratch.path().join("res.zip");
        self.client
            .download_resource(leaf_path.leaf, &plan.resource, &zip_path)?;

        match plan.format {
            DownloadFormat::Xnat => {
                let outdir = root
                    .join(&leaf_path.project.label)
                    .join(&leaf_path.subject.label)
                    .join(&leaf_path.experiment.label)
                    .join(&leaf_path.leaf.label);
                let files = extract_zip_flat(&zip_path, outdir.as_std_path())?;
                Ok(DownloadItem {
                    node: leaf_path.describe(),
                    resource: plan.resource.clone(),
                    format: plan.format,
                    destination: outdir.to_string(),
                    files: files.len(),
                    conversion: None,
                })
            }
            DownloadFormat::Bids => {
                let project = BidsId::sanitize(&leaf_path.project.label);
                let subject = BidsId::sanitize(&leaf_path.subject.label);
                let session = BidsId::sanitize(&leaf_path.experiment.label);
                let project_dir = root.join(project.as_str());
                let session_dir = project_dir
                    .join(format!("sub-{subject}"))
                    .join(format!("ses-{session}"));
                fs::create_dir_all(session_dir.as_std_path())
                    .map_err(|err| XnatcError::Filesystem(err.to_string()))?;

                // Staged next to the destination so relocation is a rename.
                let staging = Builder::new()
                    .prefix(".xnatc-staging")
                    .tempdir_in(session_dir.as_std_path())
                    .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
                let staging_dir = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
                    .map_err(|_| XnatcError::Filesystem("invalid staging dir".to_string()))?;
                let files = extract_zip_flat(&zip_path, staging.path())?;

                let target = SessionTarget::new(session_dir.clone(), subject.clone(), session);
                let report = convert_scan(&staging_dir, &target, registry)?;

                ensure_participant(&project_dir, &subject)?;
                ensure_dataset_description(&project_dir, &leaf_path.project.label)?;
                ensure_readme(
                    &project_dir,
                    self.config.host.as_str(),
                    &leaf_path.project.label,
                )?;

                Ok(DownloadItem {
                    node: leaf_path.describe(),
                    resource: plan.resource.clone(),
                    format: plan.format,
                    destination: session_dir.to_string(),
                    files: files.len(),
                    conversion: Some(report),
                })
            }
        }
    }

    fn upload(
        &self,
        leaf_path: &LeafPath<'_>,
        plan: &UploadPlan,
        depth: usize,
        state: &mut RunState,
        sink: &dyn ProgressSink,
    ) {
        if !plan.path.is_dir() {
            self.upload_file(
                leaf_path,
                &plan.path,
                plan.resource.as_deref(),
                plan.name.as_deref(),
                depth + 1,
                state,
                sink,
            );
            return;
        }

        sink.event(ProgressEvent {
            depth,
            message: format!(" - Uploading contents of {}", plan.path.display()),
        });
        let entries = match sorted_entries(&plan.path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("{err}");
                state.result.failures.push(leaf_path.describe());
                return;
            }
        };
        for entry in entries {
            if entry.is_dir() {
                let resource = entry
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned());
                match sorted_entries(&entry) {
                    Ok(files) => {
                        for file in files.iter().filter(|file| file.is_file()) {
                            self.upload_file(
                                leaf_path,
                                file,
                                resource.as_deref(),
                                None,
                                depth + 1,
                                state,
                                sink,
                            );
                        }
                    }
                    Err(err) => warn!("{err}"),
                }
            } else {
                self.upload_file(
                    leaf_path,
                    &entry,
                    plan.resource.as_deref(),
                    None,
                    depth + 1,
                    state,
                    sink,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn upload_file(
        &self,
        leaf_path: &LeafPath<'_>,
        source: &Path,
        resource: Option<&str>,
        name: Option<&str>,
        depth: usize,
        state: &mut RunState,
        sink: &dyn ProgressSink,
    ) {
        let Some(resource) = resource.map(str::to_string).or_else(|| detect_resource(source))
        else {
            warn!(
                "Could not detect resource type for {} - will not upload",
                source.display()
            );
            return;
        };
        let name = name.map(str::to_string).unwrap_or_else(|| {
            source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        match self
            .client
            .upload_file(leaf_path.leaf, &resource, &name, source)
        {
            Ok(()) => {
                sink.event(ProgressEvent {
                    depth,
                    message: format!(" - Uploaded {} as {resource}/{name}", source.display()),
                });
                state.result.uploads.push(UploadItem {
                    node: leaf_path.describe(),
                    source: source.display().to_string(),
                    resource,
                    name,
                });
            }
            Err(err) => {
                warn!("Failed to upload {}: {err}", source.display());
                state.result.failures.push(leaf_path.describe());
            }
        }
    }
}

/// NIfTI images go to the `NIFTI` resource; anything else needs an explicit
/// resource type.
pub fn detect_resource(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    (name.ends_with(".nii") || name.ends_with(".nii.gz")).then(|| "NIFTI".to_string())
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>, XnatcError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|err| XnatcError::Filesystem(format!("read {}: {err}", dir.display())))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| XnatcError::Filesystem(err.to_string()))?;
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nifti_resource_detection() {
        assert_eq!(detect_resource(Path::new("a/T1.NII.GZ")).as_deref(), Some("NIFTI"));
        assert_eq!(detect_resource(Path::new("b.nii")).as_deref(), Some("NIFTI"));
        assert_eq!(detect_resource(Path::new("report.pdf")), None);
    }
}
