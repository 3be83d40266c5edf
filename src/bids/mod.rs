//! Reorganization of downloaded NIfTI scans into the BIDS layout.
//!
//! Staged files are grouped into acquisitions by basename, each acquisition
//! is classified by the first matching modality rule, and its name is
//! reserved in a [`CollisionRegistry`] which adds `run` entities when two
//! acquisitions would land on the same name.

pub mod acquisition;
pub mod convert;
pub mod dataset;
pub mod registry;
pub mod rules;

pub use acquisition::{Acquisition, EXTENSIONS, Grouping, Sidecar, group_acquisitions};
pub use convert::{ConversionReport, convert_scan};
pub use registry::{CollisionRegistry, Placement, Rename, Reservation, SessionTarget};
pub use rules::{Attributes, Classification, DEFAULT_RULES, ModalityRule, classify};
