use lectern_model::{CourseId, MediaKind, ResourceKey, Size};
use std::path::PathBuf;
use time::UtcDateTime;

/// Durable projection of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub url: String,
    pub course: CourseId,
    pub download_url: String,
    /// Final (sanitized, possibly conflict-renamed) file name.
    pub name: String,
    /// Directory the file was written to.
    pub directory: PathBuf,
    /// Data kind the resource was discovered as. Never a synthetic kind.
    pub kind: MediaKind,
    pub size: Size,
    pub modified: Option<UtcDateTime>,
    pub checksum: Option<String>,
    pub corrupted: bool,
}
impl CacheRecord {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.url.clone(), self.course)
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }
}

/// Outcome of looking a resource up in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Nothing is known; resolve from scratch.
    Unknown,
    /// The URL previously failed; skip it entirely.
    KnownBad,
    Record(CacheRecord),
}
