use std::fs;
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::domain::{Level, MatchType, RemoteNode};
use crate::error::XnatcError;

/// Pattern value that deselects a whole level.
pub const SKIP: &str = "skip";

/// One compiled user pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Pattern {
    fn compile(id: &str, match_type: MatchType) -> Result<Self, XnatcError> {
        let invalid = |message: String| XnatcError::InvalidPattern {
            pattern: id.to_string(),
            message,
        };
        match match_type {
            MatchType::Glob => GlobBuilder::new(id)
                .build()
                .map(|glob| Pattern::Glob(glob.compile_matcher()))
                .map_err(|err| invalid(err.to_string())),
            MatchType::Regex => Regex::new(&format!("^(?:{id})"))
                .map(Pattern::Regex)
                .map_err(|err| invalid(err.to_string())),
        }
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            Pattern::Glob(glob) => glob.is_match(candidate),
            Pattern::Regex(re) => re.is_match(candidate),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Matcher {
    All,
    Skip,
    Patterns(Vec<Pattern>),
}

impl Matcher {
    /// Compiles a user pattern. With `match_files`, a pattern naming an
    /// existing file is replaced by the IDs listed in it, one per line.
    /// Globs must match the whole candidate, regexes only its start.
    pub fn new(
        pattern: Option<&str>,
        match_type: MatchType,
        match_files: bool,
    ) -> Result<Self, XnatcError> {
        let Some(pattern) = pattern else {
            return Ok(Matcher::All);
        };
        if pattern == SKIP {
            return Ok(Matcher::Skip);
        }

        let ids = if match_files && Path::new(pattern).is_file() {
            read_id_list(Path::new(pattern))?
        } else {
            vec![pattern.to_string()]
        };

        let patterns = ids
            .iter()
            .map(|id| Pattern::compile(id, match_type))
            .collect::<Result<Vec<_>, XnatcError>>()?;
        Ok(Matcher::Patterns(patterns))
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Matcher::All => true,
            Matcher::Skip => false,
            Matcher::Patterns(patterns) => {
                patterns.iter().any(|pattern| pattern.is_match(candidate))
            }
        }
    }

/// A node matches when either its label or its ID does.
    pub fn matches_node(&self, node: &RemoteNode) -> bool {
        self.matches(&node.label) || self.matches(&node.id)
    }
}

/// Per-level matchers for one traversal.
#[derive(Debug, Clone)]
pub struct Selection {
    pub project: Matcher,
    pub subject: Matcher,
    pub experiment: Matcher,
    pub scan: Matcher,
    pub assessor: Matcher,
}

impl Selection {
    pub fn matcher(&self, level: Level) -> &Matcher {
        match level {
            Level::Project => &self.project,
            Level::Subject => &self.subject,
            Level::Experiment => &self.experiment,
            Level::Scan => &self.scan,
            Level::Assessor => &self.assessor,
        }
    }
}

fn read_id_list(path: &Path) -> Result<Vec<String>, XnatcError> {
    let content = fs::read_to_string(path)
        .map_err(|err| XnatcError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
