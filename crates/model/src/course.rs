use crate::name::sanitize_name;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Externally assigned, numeric course identifier.
#[derive(Debug, Display, From, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub u64);

/// A course, created once per run from catalog discovery.
///
/// Owns the directory namespace its resources are written under: the
/// [sanitized](sanitize_name) name is used as the directory name below the
/// download root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Course {
    pub id: CourseId,
    /// Name as shown by the content-management backend.
    pub display_name: String,
    /// Filesystem-safe version of the display name.
    pub name: String,
}
impl Course {
    pub fn new(id: impl Into<CourseId>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let name = sanitize_name(&display_name);
        Self { id: id.into(), display_name, name }
    }
}

/// User allow/deny lists of course identifiers.
///
/// An absent allow list means "everything". The deny list always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseFilter {
    pub allow: Option<Vec<CourseId>>,
    pub deny: Vec<CourseId>,
}
impl CourseFilter {
    pub fn includes(&self, id: CourseId) -> bool {
        if self.deny.contains(&id) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(&id),
            None => true,
        }
    }
}
