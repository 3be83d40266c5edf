use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use xnatc::app::{App, ProgressEvent, ProgressSink};
use xnatc::config::{Config, ConfigLoader};
use xnatc::domain::{DownloadFormat, Level, RemoteNode};
use xnatc::error::XnatcError;
use xnatc::xnat::XnatClient;

const T1_NORM: &str =
    r#"{"SeriesDescription": "3D T1 NORM MPRAGE", "ImageType": ["ORIGINAL", "PRIMARY", "M", "NORM"]}"#;

#[derive(Default)]
struct MockXnat {
    children: HashMap<String, Vec<RemoteNode>>,
    resources: HashMap<String, Vec<String>>,
    archives: HashMap<String, Vec<(String, String)>>,
    failing: HashSet<String>,
    uploads: Mutex<Vec<(String, String, String)>>,
    assessors: Mutex<Vec<String>>,
}

impl MockXnat {
    fn add(&mut self, parent: &str, level: Level, id: &str, label: &str) -> String {
        let collection = format!("{parent}/{}", level.collection());
        let uri = format!("{collection}/{id}");
        self.children.entry(collection).or_default().push(RemoteNode::new(
            level,
            id,
            Some(label.to_string()),
            uri.clone(),
        ));
        uri
    }

    fn site() -> Self {
        let mut mock = MockXnat::default();
        let project = mock.add("/data", Level::Project, "P_1", "P_1");
        mock.add("/data", Level::Project, "OTHER", "OTHER");
        let subject = mock.add(&project, Level::Subject, "XNAT_S01", "S_01");
        let experiment = mock.add(&subject, Level::Experiment, "XNAT_E01", "MR-1");
        for scan in ["1", "2", "3"] {
            let uri = mock.add(&experiment, Level::Scan, scan, scan);
            mock.resources
                .insert(uri.clone(), vec!["DICOM".to_string(), "NIFTI".to_string()]);
            mock.archives.insert(
                uri,
                vec![
                    (format!("EXP/scans/{scan}/files/mprage.nii.gz"), "img".to_string()),
                    (format!("EXP/scans/{scan}/files/mprage.json"), T1_NORM.to_string()),
                ],
            );
        }
        mock.failing.insert(format!("{experiment}/scans/3"));
        mock.add(&experiment, Level::Assessor, "XNAT_A01", "FS");
        mock
    }
}

impl XnatClient for MockXnat {
    fn list_children(
        &self,
        parent: Option<&RemoteNode>,
        level: Level,
    ) -> Result<Vec<RemoteNode>, XnatcError> {
        let parent = parent.map(|node| node.uri.as_str()).unwrap_or("/data");
        let key = format!("{parent}/{}", level.collection());
        Ok(self.children.get(&key).cloned().unwrap_or_default())
    }

    fn list_resources(&self, node: &RemoteNode) -> Result<Vec<String>, XnatcError> {
        Ok(self.resources.get(&node.uri).cloned().unwrap_or_default())
    }

    fn download_resource(
        &self,
        node: &RemoteNode,
        _resource: &str,
        destination: &Path,
    ) -> Result<(), XnatcError> {
        if self.failing.contains(&node.uri) {
            return Err(XnatcError::XnatStatus {
                status: 500,
                message: "boom".to_string(),
            });
        }
        let file = fs::File::create(destination).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in self.archives.get(&node.uri).into_iter().flatten() {
            writer
                .start_file(name.as_str(), zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        Ok(())
    }

    fn upload_file(
        &self,
        node: &RemoteNode,
        resource: &str,
        name: &str,
        _source: &Path,
    ) -> Result<(), XnatcError> {
        self.uploads.lock().unwrap().push((
            node.label.clone(),
            resource.to_string(),
            name.to_string(),
        ));
        Ok(())
    }

    fn create_assessor(&self, experiment: &RemoteNode, _xml: &Path) -> Result<(), XnatcError> {
        self.assessors.lock().unwrap().push(experiment.label.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingSink {
    fn lines(&self) -> Vec<(usize, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| (event.depth, event.message.clone()))
            .collect()
    }
}

fn config() -> Config {
    Config {
        xnat: "https://xnat.example.org".to_string(),
        user: Some("user".to_string()),
        password: Some("pw".to_string()),
        ..Config::default()
    }
}

#[test]
fn listing_follows_selection() {
    let config = Config {
        project: Some("P_*".to_string()),
        ..config()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let app = App::new(MockXnat::site(), resolved);
    let sink = RecordingSink::default();

    let result = app.run(&sink).unwrap();

    let lines = sink.lines();
    assert_eq!(lines[0], (0, "Xnat: https://xnat.example.org/".to_string()));
    assert_eq!(lines[1], (1, "Project: P_1".to_string()));
    assert_eq!(lines[2], (2, "Subject: S_01".to_string()));
    assert_eq!(lines[3], (3, "Experiment: MR-1".to_string()));
    assert!(lines.contains(&(4, "Scan: 2".to_string())));
    assert!(lines.contains(&(4, "Assessor: FS".to_string())));
    assert!(!result.visited.iter().any(|node| node.label == "OTHER"));
}

#[test]
fn scan_selection_skips_assessors() {
    let config = Config {
        scan: Some("1".to_string()),
        ..config()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let app = App::new(MockXnat::site(), resolved);

    let result = app.run(&RecordingSink::default()).unwrap();

    let leaves: Vec<_> = result
        .visited
        .iter()
        .filter(|node| node.level.is_leaf())
        .map(|node| node.label.as_str())
        .collect();
    assert_eq!(leaves, vec!["1"]);
}

#[test]
fn bids_download_disambiguates_and_isolates_failures() {
    let temp = tempfile::tempdir().unwrap();
    let config = Config {
        project: Some("P_1".to_string()),
        download: Some(temp.path().to_path_buf()),
        download_format: DownloadFormat::Bids,
        ..config()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let app = App::new(MockXnat::site(), resolved);

    let result = app.run(&RecordingSink::default()).unwrap();

    let project_dir = temp.path().join("P1");
    let anat = project_dir.join("sub-S01").join("ses-MR1").join("anat");
    for run in [1, 2] {
        for ext in ["nii.gz", "json"] {
            let path = anat.join(format!("sub-S01_ses-MR1_acq-norm_run-{run}_T1w.{ext}"));
            assert!(path.exists(), "missing {}", path.display());
        }
    }
    assert!(!anat.join("sub-S01_ses-MR1_acq-norm_T1w.nii.gz").exists());
    assert_eq!(result.downloads.len(), 2);
    assert_eq!(result.failures.len(), 1);

    let session_entries: Vec<PathBuf> = fs::read_dir(project_dir.join("sub-S01").join("ses-MR1"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(session_entries, vec![anat.clone()]);

    let participants = fs::read_to_string(project_dir.join("participants.tsv")).unwrap();
    assert_eq!(participants, "participant_id\nsub-S01\n");
    assert!(project_dir.join("dataset_description.json").exists());
    assert!(project_dir.join("README").exists());
}

#[test]
fn xnat_download_keeps_labels() {
    let temp = tempfile::tempdir().unwrap();
    let config = Config {
        scan: Some("1".to_string()),
        download: Some(temp.path().to_path_buf()),
        download_resource: "NIFTI".to_string(),
        ..config()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let app = App::new(MockXnat::site(), resolved);

    let result = app.run(&RecordingSink::default()).unwrap();

    let scan_dir = temp.path().join("P_1").join("S_01").join("MR-1").join("1");
    assert!(scan_dir.join("mprage.nii.gz").exists());
    assert!(scan_dir.join("mprage.json").exists());
    assert_eq!(result.downloads[0].files, 2);
}

#[test]
fn upload_detects_nifti_resource() {
    let temp = tempfile::tempdir().unwrap();
    let image = temp.path().join("T1.nii.gz");
    fs::write(&image, b"img").unwrap();
    let config = Config {
        project: Some("P_1".to_string()),
        subject: Some("S_01".to_string()),
        experiment: Some("MR-1".to_string()),
        scan: Some("2".to_string()),
        upload: Some(image),
        ..config()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let app = App::new(MockXnat::site(), resolved);

    let result = app.run(&RecordingSink::default()).unwrap();

    assert_eq!(result.uploads.len(), 1);
    assert_eq!(result.uploads[0].resource, "NIFTI");
    assert_eq!(result.uploads[0].name, "T1.nii.gz");
}

#[test]
fn create_assessor_stops_at_experiments() {
    let temp = tempfile::tempdir().unwrap();
    let xml = temp.path().join("assessor.xml");
    fs::write(&xml, "<assessor/>").unwrap();
    let config = Config {
        create_assessor: Some(xml),
        ..config()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let app = App::new(MockXnat::site(), resolved);

    let result = app.run(&RecordingSink::default()).unwrap();

    assert_eq!(result.assessors_created, vec!["MR-1".to_string()]);
    assert!(!result.visited.iter().any(|node| node.level.is_leaf()));
}
