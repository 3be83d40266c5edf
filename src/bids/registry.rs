use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};

use super::rules::Attributes;
use crate::domain::BidsId;

/// Destination session directory and the identifiers every file name in it
/// starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub dir: Utf8PathBuf,
    pub subject: BidsId,
    pub session: BidsId,
}

impl SessionTarget {
    pub fn new(dir: Utf8PathBuf, subject: BidsId, session: BidsId) -> Self {
        Self {
            dir,
            subject,
            session,
        }
    }

    /// `sub-<S>_ses-<E>[_<k>-<v>]*_<suffix>`, without extension.
    pub fn base_name(&self, attributes: &Attributes, suffix: &str) -> String {
        let mut name = format!("sub-{}_ses-{}", self.subject, self.session);
        if !attributes.is_empty() {
            name.push('_');
            name.push_str(&attributes.to_string());
        }
        name.push('_');
        name.push_str(suffix);
        name
    }
}

/// An acquisition that holds a destination name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub folder: String,
    pub suffix: String,
    pub attributes: Attributes,
    pub base_name: String,
    pub extensions: Vec<&'static str>,
}

impl Placement {
    pub fn path(&self, session_dir: &Utf8Path, extension: &str) -> Utf8PathBuf {
        session_dir
            .join(&self.folder)
            .join(format!("{}{extension}", self.base_name))
    }
}

/// A placement whose files must move on disk because a later acquisition
/// collided with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: Placement,
    pub to: Placement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub placement: Placement,
    pub renames: Vec<Rename>,
}

#[derive(Debug, Default)]
struct SessionSlots {
    placements: Vec<Placement>,
    occupied: HashMap<(String, String), usize>,
}

/// Names handed out so far, per session directory. Owned by one driver and
/// passed in explicitly; nothing here touches the filesystem.
#[derive(Debug, Default)]
pub struct CollisionRegistry {
    sessions: HashMap<Utf8PathBuf, SessionSlots>,
}

impl CollisionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_occupied(&self, session_dir: &Utf8Path, folder: &str, base_name: &str) -> bool {
        self.sessions
            .get(session_dir)
            .map(|slots| {
                slots
                    .occupied
                    .contains_key(&(folder.to_string(), base_name.to_string()))
            })
            .unwrap_or(false)
    }

    /// Frees the name held by `placement` after its files could not be
    /// placed. Earlier placements it displaced keep their `run-1` name.
    pub fn release(&mut self, session_dir: &Utf8Path, placement: &Placement) {
        let Some(slots) = self.sessions.get_mut(session_dir) else {
            return;
        };
        let key = (placement.folder.clone(), placement.base_name.clone());
        if let Some(&idx) = slots.occupied.get(&key) {
            if slots.placements[idx] == *placement {
                slots.occupied.remove(&key);
            }
        }
    }

    /// Reserves a destination name, adding a `run` entity until the name is
    /// free. The first collision with a run-less placement also moves that
    /// placement to `run-1`; it is reported in [`Reservation::renames`].
    pub fn reserve(
        &mut self,
        target: &SessionTarget,
        folder: &str,
        suffix: &str,
        attributes: Attributes,
        extensions: Vec<&'static str>,
    ) -> Reservation {
        let slots = self.sessions.entry(target.dir.clone()).or_default();
        let mut attributes = attributes;
        let mut renames = Vec::new();

        loop {
            let key = (folder.to_string(), target.base_name(&attributes, suffix));
            let Some(&idx) = slots.occupied.get(&key) else {
                break;
            };

            let previous = &slots.placements[idx];
            let next_run = match previous.attributes.run() {
                Some(run) => run + 1,
                None => {
                    let renamed_attributes = previous.attributes.with_run(1);
                    let renamed = Placement {
                        base_name: target.base_name(&renamed_attributes, &previous.suffix),
                        attributes: renamed_attributes,
                        ..previous.clone()
                    };
                    renames.push(Rename {
                        from: previous.clone(),
                        to: renamed.clone(),
                    });
                    // The run-less name stays reserved and now resolves to
                    // the renamed placement, so later arrivals count on.
                    slots
                        .occupied
                        .insert((renamed.folder.clone(), renamed.base_name.clone()), idx);
                    slots.placements[idx] = renamed;
                    2
                }
            };
            attributes = attributes.with_run(next_run);
        }

        let placement = Placement {
            folder: folder.to_string(),
            suffix: suffix.to_string(),
            base_name: target.base_name(&attributes, suffix),
            attributes,
            extensions,
        };
        slots.occupied.insert(
            (placement.folder.clone(), placement.base_name.clone()),
            slots.placements.len(),
        );
        slots.placements.push(placement.clone());

        Reservation { placement, renames }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SessionTarget {
        SessionTarget::new(
            Utf8PathBuf::from("/out/P/sub-01/ses-A"),
            BidsId::sanitize("01"),
            BidsId::sanitize("A"),
        )
    }

    fn norm() -> Attributes {
        Attributes::new().with("acq", "norm")
    }

    #[test]
    fn base_name_without_attributes_has_no_double_underscore() {
        assert_eq!(target().base_name(&Attributes::new(), "dwi"), "sub-01_ses-A_dwi");
        assert_eq!(
            target().base_name(&norm(), "T1w"),
            "sub-01_ses-A_acq-norm_T1w"
        );
    }

    #[test]
    fn free_name_is_reserved_unchanged() {
        let mut registry = CollisionRegistry::new();
        let reservation = registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        assert_eq!(reservation.placement.attributes, norm());
        assert!(reservation.renames.is_empty());
        assert!(registry.is_occupied(&target().dir, "anat", "sub-01_ses-A_acq-norm_T1w"));
    }

    #[test]
    fn second_collision_renames_first_to_run_one() {
        let mut registry = CollisionRegistry::new();
        registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii", ".json"]);
        let second = registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);

        assert_eq!(second.placement.base_name, "sub-01_ses-A_acq-norm_run-2_T1w");
        assert_eq!(second.renames.len(), 1);
        let rename = &second.renames[0];
        assert_eq!(rename.from.base_name, "sub-01_ses-A_acq-norm_T1w");
        assert_eq!(rename.to.base_name, "sub-01_ses-A_acq-norm_run-1_T1w");
        assert_eq!(rename.to.extensions, vec![".nii", ".json"]);
    }

    #[test]
    fn third_collision_gets_run_three_without_renames() {
        let mut registry = CollisionRegistry::new();
        registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        let third = registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);

        assert_eq!(third.placement.base_name, "sub-01_ses-A_acq-norm_run-3_T1w");
        assert_eq!(third.placement.attributes.run(), Some(3));
        assert!(third.renames.is_empty());
    }

    #[test]
    fn released_name_is_handed_out_again() {
        let mut registry = CollisionRegistry::new();
        let first = registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        registry.release(&target().dir, &first.placement);
        assert!(!registry.is_occupied(&target().dir, "anat", "sub-01_ses-A_acq-norm_T1w"));

        let again = registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        assert_eq!(again.placement.base_name, "sub-01_ses-A_acq-norm_T1w");
        assert!(again.renames.is_empty());
    }

    #[test]
    fn released_run_two_is_reused_after_run_one() {
        let mut registry = CollisionRegistry::new();
        registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        let second = registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        registry.release(&target().dir, &second.placement);

        let third = registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        assert_eq!(third.placement.base_name, "sub-01_ses-A_acq-norm_run-2_T1w");
        assert!(third.renames.is_empty());
    }

    #[test]
    fn folders_and_sessions_are_independent() {
        let mut registry = CollisionRegistry::new();
        registry.reserve(&target(), "anat", "T1w", norm(), vec![".nii"]);
        let other_folder = registry.reserve(&target(), "func", "T1w", norm(), vec![".nii"]);
        assert!(other_folder.renames.is_empty());

        let other_session = SessionTarget {
            dir: Utf8PathBuf::from("/out/P/sub-01/ses-B"),
            ..target()
        };
        let reservation = registry.reserve(&other_session, "anat", "T1w", norm(), vec![".nii"]);
        assert_eq!(reservation.placement.attributes.run(), None);
    }
}
