//! Resource catalog: resolution and conflict resolution.
//!
//! Catalog discovery (scraping the content-management backend) happens
//! elsewhere and hands over [`CandidateResource`]s. This crate turns them
//! into [`Resource`]s, hydrating what it can from the cache, and then makes
//! sure no two resources end up fighting over the same file.

mod conflict;
pub mod error;
mod resolve;
mod resource;

pub use crate::conflict::{Resolution, resolve_conflicts};
pub use crate::resolve::{Indirection, Resolver, needs_transfer};
pub use crate::resource::{CandidateResource, Progress, Resource};
pub use lectern_model::{Course, CourseFilter};
