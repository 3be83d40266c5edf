use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

/// Extension vocabulary, longest match first so `.nii.gz` is never reduced
/// to `.nii`.
pub const EXTENSIONS: [&str; 5] = [".nii.gz", ".nii", ".json", ".bval", ".bvec"];

pub const SIDECAR_EXTENSION: &str = ".json";

/// One logical scan output: a basename plus the vocabulary extensions
/// present for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub basename: String,
    pub extensions: Vec<&'static str>,
}

impl Acquisition {
    pub fn has_sidecar(&self) -> bool {
        self.extensions.contains(&SIDECAR_EXTENSION)
    }

    pub fn file_names(&self) -> impl Iterator<Item = String> + '_ {
        self.extensions
            .iter()
            .map(|ext| format!("{}{ext}", self.basename))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    /// Sorted by basename; this order decides run numbering on collision.
    pub acquisitions: Vec<Acquisition>,
    /// Names carrying no vocabulary extension.
    pub strays: Vec<String>,
}

/// Splits a file name into basename and vocabulary extension.
pub fn split_extension(file_name: &str) -> Option<(&str, &'static str)> {
    EXTENSIONS.iter().find_map(|ext| {
        file_name
            .strip_suffix(ext)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *ext))
    })
}

pub fn group_acquisitions<'a, I>(file_names: I) -> Grouping
where
    I: IntoIterator<Item = &'a str>,
{
    let mut by_basename: BTreeMap<String, Vec<&'static str>> = BTreeMap::new();
    let mut strays = Vec::new();
    for name in file_names {
        match split_extension(name) {
            Some((base, ext)) => {
                let exts = by_basename.entry(base.to_string()).or_default();
                if !exts.contains(&ext) {
                    exts.push(ext);
                }
            }
            None => strays.push(name.to_string()),
        }
    }

    let acquisitions = by_basename
        .into_iter()
        .map(|(basename, mut extensions)| {
            extensions.sort_by_key(|ext| EXTENSIONS.iter().position(|known| known == ext));
            Acquisition {
                basename,
                extensions,
            }
        })
        .collect();
    strays.sort();

    Grouping {
        acquisitions,
        strays,
    }
}

/// Sidecar metadata as read from disk. Absence and malformed content are
/// legal and degrade to an empty mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Sidecar {
    Present(Map<String, Value>),
    Absent,
    Malformed(String),
}

impl Sidecar {
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Sidecar::Absent;
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => return Sidecar::Malformed(err.to_string()),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Self {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(map)) => Sidecar::Present(map),
            Ok(_) => Sidecar::Malformed("sidecar is not a JSON object".to_string()),
            Err(err) => Sidecar::Malformed(err.to_string()),
        }
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Sidecar::Present(map) => Some(map),
            Sidecar::Absent | Sidecar::Malformed(_) => None,
        }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.fields().and_then(|map| map.get(key))
    }

    /// Lower-cased `SeriesDescription`, empty when missing.
    pub fn description(&self) -> String {
        self.get("SeriesDescription")
            .and_then(|value| value.as_str())
            .map(|value| value.to_lowercase())
            .unwrap_or_default()
    }

    /// `ImageType` tokens. Accepts a list of strings or a single string.
    pub fn image_type(&self) -> Vec<String> {
        match self.get("ImageType") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|item| item.to_string())
                .collect(),
            Some(Value::String(value)) => vec![value.clone()],
            _ => Vec::new(),
        }
    }

    pub fn has_image_type(&self, token: &str) -> bool {
        self.image_type().iter().any(|value| value == token)
    }

    pub fn echo_number(&self) -> Option<u32> {
        let value = self.get("EchoNumber")?;
        if let Some(number) = value.as_u64() {
            return u32::try_from(number).ok();
        }
        value
            .as_f64()
            .filter(|number| number.fract() == 0.0 && *number >= 0.0)
            .map(|number| number as u32)
    }
}
