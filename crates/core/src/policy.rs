//! Authorization policy.
//!
//! Pure decisions over roles and degrees. Every layer that exposes data (page
//! handlers, resource endpoints, listings) asks these functions instead of
//! comparing roles or degrees itself.

use crate::profile::{Profile, ProfileChanges, UserId};
use crate::ritual::Ritual;

/// Degree a document requires of its viewers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequiredDegree {
    /// Viewers need at least this degree.
    AtLeast(i32),
    /// Degree not recorded. Only admins may see the document.
    Unlisted,
}

impl RequiredDegree {
    /// Requirement of a document.
    pub fn of(ritual: &Ritual) -> Self {
        match ritual.degree {
            Some(degree) => Self::AtLeast(degree),
            None => Self::Unlisted,
        }
    }

    /// Check whether a member degree satisfies this requirement.
    pub fn admits(&self, degree: i32) -> bool {
        match self {
            Self::AtLeast(required) => degree >= *required,
            Self::Unlisted => false,
        }
    }
}

/// A member may read a document if they are an admin or their degree
/// reaches the document's.
pub fn can_access_document(profile: &Profile, ritual: &Ritual) -> bool {
    profile.is_admin() || RequiredDegree::of(ritual).admits(profile.effective_degree())
}

/// Creating, editing, confirming and deleting members.
pub fn can_manage_users(profile: &Profile) -> bool {
    profile.is_admin()
}

/// Deleting documents. Same capability as user management.
pub fn can_delete_document(profile: &Profile) -> bool {
    can_manage_users(profile)
}

/// Any signed-in member with a profile may upload.
pub fn can_upload_document(_profile: &Profile) -> bool {
    true
}

/// Admins edit any field of any profile. Members may only rename themselves.
pub fn can_update_profile(actor: &Profile, target: UserId, changes: &ProfileChanges) -> bool {
    if can_manage_users(actor) {
        return true;
    }
    actor.id == target && changes.touches_only_name()
}

/// Admins reset anyone's password; members change their own.
pub fn can_change_password(actor: &Profile, target: UserId) -> bool {
    can_manage_users(actor) || actor.id == target
}

/// Documents a viewer may see. Anonymous viewers see nothing.
pub fn visible_documents(viewer: Option<&Profile>, rituals: Vec<Ritual>) -> Vec<Ritual> {
    match viewer {
        Some(profile) => rituals
            .into_iter()
            .filter(|ritual| can_access_document(profile, ritual))
            .collect(),
        None => Vec::new(),
    }
}
