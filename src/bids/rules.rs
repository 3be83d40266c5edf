use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::acquisition::Sidecar;

/// Filename marker dcm2niix appends to phase images.
pub const PHASE_MARKER: &str = "_ph";

static ECHO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(?:echo|e)(\d+)(?:_ph)?$").unwrap());
static COIL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"coil(\d+)").unwrap());

/// Ordered BIDS entities. Order is the literal token order in the
/// generated name; keys are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a record with `key` set. An existing key keeps its position.
    pub fn with(&self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        let mut entries = self.0.clone();
        match entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
        Self(entries)
    }

    pub fn with_run(&self, run: u32) -> Self {
        self.with("run", run.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn run(&self) -> Option<u32> {
        self.get("run").and_then(|value| value.parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str("_")?;
            }
            write!(f, "{key}-{value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub folder: &'static str,
    pub suffix: &'static str,
    pub attributes: Attributes,
    pub sidecar_patch: Map<String, Value>,
}

impl Classification {
    fn new(folder: &'static str, suffix: &'static str) -> Self {
        Self {
            folder,
            suffix,
            attributes: Attributes::new(),
            sidecar_patch: Map::new(),
        }
    }
}

pub trait ModalityRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means the rule does not recognize the acquisition.
    fn classify(&self, file_name: &str, sidecar: &Sidecar) -> Option<Classification>;
}

pub struct Anatomical;
pub struct Functional;
pub struct Diffusion;
pub struct SusceptibilityWeighted;

/// First match wins, so earlier rules claim descriptions that also carry a
/// later rule's tokens.
pub const DEFAULT_RULES: &[&dyn ModalityRule] = &[
    &Anatomical,
    &Functional,
    &Diffusion,
    &SusceptibilityWeighted,
];

pub fn classify(file_name: &str, sidecar: &Sidecar) -> Option<Classification> {
    DEFAULT_RULES
        .iter()
        .find_map(|rule| rule.classify(file_name, sidecar))
}

impl ModalityRule for Anatomical {
    fn name(&self) -> &'static str {
        "anat"
    }

    fn classify(&self, file_name: &str, sidecar: &Sidecar) -> Option<Classification> {
        let desc = sidecar.description();
        let suffix = if desc.contains("t1") {
            "T1w"
        } else if desc.contains("t2star") {
            "T2starw"
        } else if desc.contains("t2") {
            "T2w"
        } else {
            return None;
        };

        let mut result = Classification::new("anat", suffix);
        if sidecar.has_image_type("NORM") {
            result.attributes = result.attributes.with("acq", "norm");
        }
        if let Some(echo) = echo_number(file_name, sidecar) {
            result.attributes = result.attributes.with("echo", echo.to_string());
        }
        if sidecar.has_image_type("PHASE") || file_name.to_lowercase().ends_with(PHASE_MARKER) {
            result.attributes = result.attributes.with("part", "phase");
        }
        Some(result)
    }
}

impl ModalityRule for Functional {
    fn name(&self) -> &'static str {
        "func"
    }

    fn classify(&self, _file_name: &str, sidecar: &Sidecar) -> Option<Classification> {
        let desc = sidecar.description();
        if !desc.contains("fmri") {
            return None;
        }

        let mut result = Classification::new("func", sbref_or(&desc, "bold"));
        if desc.contains("resting") {
            result.attributes = result.attributes.with("task", "rest");
        } else if desc.contains("task") {
            result.attributes = result.attributes.with("task", "task");
            result
                .sidecar_patch
                .insert("TaskName".to_string(), Value::String("task".to_string()));
        }
        Some(result)
    }
}

impl ModalityRule for Diffusion {
    fn name(&self) -> &'static str {
        "dwi"
    }

    fn classify(&self, _file_name: &str, sidecar: &Sidecar) -> Option<Classification> {
        let desc = sidecar.description();
        desc.contains("diff")
            .then(|| Classification::new("dwi", sbref_or(&desc, "dwi")))
    }
}

impl ModalityRule for SusceptibilityWeighted {
    fn name(&self) -> &'static str {
        "swi"
    }

    fn classify(&self, file_name: &str, sidecar: &Sidecar) -> Option<Classification> {
        let desc = sidecar.description();
        if !desc.contains("swi") {
            return None;
        }

        let mut result = Classification::new("swi", sbref_or(&desc, "swi"));
        if let Some(echo) = echo_number(file_name, sidecar) {
            result.attributes = result.attributes.with("echo", echo.to_string());
        }
        if let Some(coil) = coil_number(file_name) {
            result.attributes = result.attributes.with("coil", coil.to_string());
        }
        Some(result)
    }
}

fn sbref_or(desc: &str, suffix: &'static str) -> &'static str {
    if desc.contains("sbref") { "sbref" } else { suffix }
}

/// Sidecar `EchoNumber` wins over a trailing `_e<N>`/`_echo<N>` token.
pub fn echo_number(file_name: &str, sidecar: &Sidecar) -> Option<u32> {
    sidecar.echo_number().or_else(|| {
        ECHO_RE
            .captures(&file_name.to_lowercase())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

pub fn coil_number(file_name: &str) -> Option<u32> {
    COIL_RE
        .captures(&file_name.to_lowercase())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
