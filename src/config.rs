use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use reqwest::Url;
use tracing::warn;

use crate::domain::{DownloadFormat, MatchType};
use crate::error::XnatcError;
use crate::select::{Matcher, SKIP, Selection};

pub const DEFAULT_XNAT: &str = "https://xnatpriv.nottingham.ac.uk/";
pub const DEFAULT_DOWNLOAD_RESOURCE: &str = "DICOM";
pub const BIDS_RESOURCE: &str = "NIFTI";

/// Raw settings as given on the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub xnat: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub project: Option<String>,
    pub subject: Option<String>,
    pub experiment: Option<String>,
    pub scan: Option<String>,
    pub assessor: Option<String>,
    pub match_type: MatchType,
    pub match_files: bool,
    pub download: Option<PathBuf>,
    pub download_resource: String,
    pub download_format: DownloadFormat,
    pub upload: Option<PathBuf>,
    pub upload_resource: Option<String>,
    pub upload_name: Option<String>,
    pub create_assessor: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xnat: DEFAULT_XNAT.to_string(),
            user: None,
            password: None,
            project: None,
            subject: None,
            experiment: None,
            scan: None,
            assessor: None,
            match_type: MatchType::Glob,
            match_files: false,
            download: None,
            download_resource: DEFAULT_DOWNLOAD_RESOURCE.to_string(),
            download_format: DownloadFormat::Xnat,
            upload: None,
            upload_resource: None,
            upload_name: None,
            create_assessor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub dir: PathBuf,
    pub resource: String,
    pub format: DownloadFormat,
}

#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub path: PathBuf,
    pub resource: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub host: Url,
    pub credentials: Credentials,
    pub selection: Selection,
    pub download: Option<DownloadPlan>,
    pub upload: Option<UploadPlan>,
    pub create_assessor: Option<PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(config: Config) -> Result<ResolvedConfig, XnatcError> {
        let netrc = BaseDirs::new().map(|dirs| dirs.home_dir().join(".netrc"));
        Self::resolve_with_netrc(config, netrc.as_deref())
    }

    pub fn resolve_with_netrc(
        config: Config,
        netrc: Option<&Path>,
    ) -> Result<ResolvedConfig, XnatcError> {
        let host = normalize_host(&config.xnat)?;
        let credentials = resolve_credentials(&config, &host, netrc)?;

        if config.upload.is_some()
            && (config.project.is_none()
                || config.subject.is_none()
                || config.experiment.is_none()
                || (config.scan.is_none() && config.assessor.is_none()))
        {
            return Err(XnatcError::IncompleteUploadTarget);
        }

        let (scan, assessor) = match (config.scan.as_deref(), config.assessor.as_deref()) {
            (Some(scan), None) => (Some(scan), Some(SKIP)),
            (None, Some(assessor)) => (Some(SKIP), Some(assessor)),
            other => other,
        };

        let compile = |pattern: Option<&str>| {
            Matcher::new(pattern, config.match_type, config.match_files)
        };
        let selection = Selection {
            project: compile(config.project.as_deref())?,
            subject: compile(config.subject.as_deref())?,
            experiment: compile(config.experiment.as_deref())?,
            scan: compile(scan)?,
            assessor: compile(assessor)?,
        };

        let download = config.download.clone().map(|dir| {
            let mut resource = config.download_resource.clone();
            if config.download_format == DownloadFormat::Bids && resource != BIDS_RESOURCE {
                warn!("Setting download resource to {BIDS_RESOURCE} as required for BIDS");
                resource = BIDS_RESOURCE.to_string();
            }
            DownloadPlan {
                dir,
                resource,
                format: config.download_format,
            }
        });

        let upload = config.upload.clone().map(|path| UploadPlan {
            path,
            resource: config.upload_resource.clone(),
            name: config.upload_name.clone(),
        });

        Ok(ResolvedConfig {
            host,
            credentials,
            selection,
            download,
            upload,
            create_assessor: config.create_assessor,
        })
    }
}

/// Parses the archive URL, assuming HTTPS when no scheme is given.
pub fn normalize_host(value: &str) -> Result<Url, XnatcError> {
    let trimmed = value.trim();
    let with_scheme = if trimmed.contains("//") {
        trimmed.to_string()
    } else {
        warn!("XNAT host did not have HTTP or HTTPS specified - assuming HTTPS");
        format!("https://{trimmed}")
    };
    let url = Url::parse(&with_scheme).map_err(|_| XnatcError::InvalidHost(value.to_string()))?;
    if url.host_str().is_none() {
        return Err(XnatcError::InvalidHost(value.to_string()));
    }
    Ok(url)
}

fn resolve_credentials(
    config: &Config,
    host: &Url,
    netrc: Option<&Path>,
) -> Result<Credentials, XnatcError> {
    if let (Some(user), Some(password)) = (&config.user, &config.password) {
        return Ok(Credentials {
            user: user.clone(),
            password: password.clone(),
        });
    }

    let hostname = host.host_str().unwrap_or_default();
    if let Some(path) = netrc.filter(|path| path.exists()) {
        let content =
            fs::read_to_string(path).map_err(|_| XnatcError::NetrcRead(path.to_path_buf()))?;
        if let Some(credentials) = netrc_lookup(&content, hostname) {
            return Ok(credentials);
        }
    }
    warn!("No authentication information found in $HOME/.netrc");
    Err(XnatcError::MissingCredentials(hostname.to_string()))
}

/// Finds `login`/`password` for `host` in netrc content, falling back to a
/// `default` entry.
pub fn netrc_lookup(content: &str, host: &str) -> Option<Credentials> {
    let mut tokens = content.split_whitespace();
    let mut current: Option<Option<String>> = None;
    let mut login = None;
    let mut password = None;
    let mut fallback = None;

    let mut finish = |machine: Option<Option<String>>,
                      login: Option<String>,
                      password: Option<String>|
     -> Option<Credentials> {
        let (Some(machine), Some(user), Some(password)) = (machine, login, password) else {
            return None;
        };
        let credentials = Credentials { user, password };
        match machine {
            Some(name) if name == host => Some(credentials),
            Some(_) => None,
            None => {
                fallback.get_or_insert(credentials);
                None
            }
        }
    };

    while let Some(token) = tokens.next() {
        match token {
            "machine" | "default" => {
                if let Some(found) = finish(current.take(), login.take(), password.take()) {
                    return Some(found);
                }
                current = Some(if token == "machine" {
                    tokens.next().map(str::to_string)
                } else {
                    None
                });
            }
            "login" => login = tokens.next().map(str::to_string),
            "password" => password = tokens.next().map(str::to_string),
            "account" => {
                tokens.next();
            }
            _ => {}
        }
    }
    if let Some(found) = finish(current, login, password) {
        return Some(found);
    }
    fallback
}
