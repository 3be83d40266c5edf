use std::fs;
use std::path::PathBuf;

use assert_matches::assert_matches;
use xnatc::config::{Config, ConfigLoader, DEFAULT_DOWNLOAD_RESOURCE};
use xnatc::domain::{DownloadFormat, Level, MatchType};
use xnatc::error::XnatcError;
use xnatc::select::Matcher;

fn with_credentials() -> Config {
    Config {
        xnat: "xnat.example.org".to_string(),
        user: Some("user".to_string()),
        password: Some("pw".to_string()),
        ..Config::default()
    }
}

#[test]
fn resolve_defaults() {
    let resolved = ConfigLoader::resolve_with_netrc(with_credentials(), None).unwrap();

    assert_eq!(resolved.host.as_str(), "https://xnat.example.org/");
    assert!(resolved.download.is_none());
    assert!(resolved.upload.is_none());
    for level in [
        Level::Project,
        Level::Subject,
        Level::Experiment,
        Level::Scan,
        Level::Assessor,
    ] {
        assert_matches!(resolved.selection.matcher(level), Matcher::All);
    }
}

#[test]
fn xnat_download_keeps_requested_resource() {
    let config = Config {
        download: Some(PathBuf::from("out")),
        ..with_credentials()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let plan = resolved.download.unwrap();
    assert_eq!(plan.resource, DEFAULT_DOWNLOAD_RESOURCE);
    assert_eq!(plan.format, DownloadFormat::Xnat);
}

#[test]
fn assessor_only_skips_scans() {
    let config = Config {
        assessor: Some("FS*".to_string()),
        ..with_credentials()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    assert_matches!(resolved.selection.scan, Matcher::Skip);
    assert!(resolved.selection.assessor.matches("FS_v7"));
    assert!(!resolved.selection.assessor.matches("xFS"));
}

#[test]
fn match_files_expand_id_lists() {
    let temp = tempfile::tempdir().unwrap();
    let list = temp.path().join("subjects.txt");
    fs::write(&list, "S01\n\n  S03  \n").unwrap();
    let config = Config {
        subject: Some(list.to_string_lossy().into_owned()),
        match_files: true,
        ..with_credentials()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let subjects = &resolved.selection.subject;
    assert!(subjects.matches("S01"));
    assert!(subjects.matches("S03"));
    assert!(!subjects.matches("S02"));
    assert!(!subjects.matches("S010"));
}

#[test]
fn regex_patterns_anchor_at_start() {
    let config = Config {
        experiment: Some("MR[0-9]+".to_string()),
        match_type: MatchType::Regex,
        ..with_credentials()
    };
    let resolved = ConfigLoader::resolve_with_netrc(config, None).unwrap();
    let experiments = &resolved.selection.experiment;
    assert!(experiments.matches("MR12"));
    assert!(experiments.matches("MR12_repeat"));
    assert!(!experiments.matches("xMR12"));
}

#[test]
fn invalid_regex_is_reported() {
    let config = Config {
        project: Some("(".to_string()),
        match_type: MatchType::Regex,
        ..with_credentials()
    };
    let err = ConfigLoader::resolve_with_netrc(config, None).unwrap_err();
    assert_matches!(err, XnatcError::InvalidPattern { .. });
}

#[test]
fn invalid_host_is_rejected() {
    let config = Config {
        xnat: "https://".to_string(),
        ..with_credentials()
    };
    let err = ConfigLoader::resolve_with_netrc(config, None).unwrap_err();
    assert_matches!(err, XnatcError::InvalidHost(_));
}
