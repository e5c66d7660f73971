//! Data model shared by every lectern crate.
//!
//! Nothing in here performs I/O. The types describe *what* a course or a
//! resource is, the crates built on top decide what to do with them:
//!
//! - [`Course`] and [`CourseFilter`] describe the directory namespaces a run
//!   writes into, and which of them the user wants.
//! - [`MediaKind`] tags a resource with its data kind, or with one of the two
//!   terminal synthetic kinds ([`Corrupted`](MediaKind::Corrupted) and
//!   [`Hardlink`](MediaKind::Hardlink)).
//! - [`Size`] is the three-way size descriptor: a byte count, a duration, or
//!   nothing at all.
//! - [`ResourceKey`] is the identity of a resource across runs.

mod course;
mod kind;
pub mod millis;
mod name;
mod size;

pub use crate::course::{Course, CourseFilter, CourseId};
pub use crate::kind::{MediaKind, UnknownKind};
pub use crate::name::sanitize_name;
pub use crate::size::Size;

/// Stable identity of a resource: the URL it was discovered under plus the
/// course it belongs to.
///
/// The same URL can legitimately appear in two courses (shared slides), so
/// the URL alone is not enough.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub url: String,
    pub course: CourseId,
}

impl ResourceKey {
    pub fn new(url: impl Into<String>, course: CourseId) -> Self {
        Self { url: url.into(), course }
    }
}
