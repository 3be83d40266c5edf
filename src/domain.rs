use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

/// Node levels below the site root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Project,
    Subject,
    Experiment,
    Scan,
    Assessor,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Project => "project",
            Level::Subject => "subject",
            Level::Experiment => "experiment",
            Level::Scan => "scan",
            Level::Assessor => "assessor",
        }
    }

    /// Plural collection name used in archive URIs.
    pub fn collection(&self) -> &'static str {
        match self {
            Level::Project => "projects",
            Level::Subject => "subjects",
            Level::Experiment => "experiments",
            Level::Scan => "scans",
            Level::Assessor => "assessors",
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Level::Scan | Level::Assessor)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => write!(f, "{}{}", first.to_ascii_uppercase(), chars.as_str()),
            None => Ok(()),
        }
    }
}

/// Levels visited below the site root, in traversal order.
pub const HIERARCHY: [&[Level]; 4] = [
    &[Level::Project],
    &[Level::Subject],
    &[Level::Experiment],
    &[Level::Scan, Level::Assessor],
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteNode {
    pub level: Level,
    pub id: String,
    pub label: String,
    pub uri: String,
}

impl RemoteNode {
    pub fn new(level: Level, id: impl Into<String>, label: Option<String>, uri: String) -> Self {
        let id = id.into();
        let label = label.filter(|value| !value.is_empty()).unwrap_or_else(|| id.clone());
        Self {
            level,
            id,
            label,
            uri,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    #[default]
    Xnat,
    Bids,
}

impl fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadFormat::Xnat => write!(f, "xnat"),
            DownloadFormat::Bids => write!(f, "bids"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MatchType {
    #[default]
    Glob,
    #[value(name = "re")]
    Regex,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Glob => write!(f, "glob"),
            MatchType::Regex => write!(f, "re"),
        }
    }
}

/// A label usable as a BIDS identifier. Hyphens and underscores are
/// reserved as entity separators so they are stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BidsId(String);

impl BidsId {
    pub fn sanitize(label: &str) -> Self {
        Self(label.chars().filter(|ch| *ch != '-' && *ch != '_').collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BidsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
