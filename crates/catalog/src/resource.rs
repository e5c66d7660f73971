use lectern_cache::CacheRecord;
use lectern_model::{CourseId, MediaKind, ResourceKey, Size};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use time::UtcDateTime;

/// A resource as discovered by the catalog, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateResource {
    pub url: String,
    pub course: CourseId,
    /// Data kind. Synthetic kinds make no sense here.
    pub kind: MediaKind,
    pub name: Option<String>,
    /// Folder the resource was listed under, relative to the course.
    pub location: Option<String>,
    pub size: Size,
    pub modified: Option<UtcDateTime>,
}

impl CandidateResource {
    pub fn new(url: impl Into<String>, course: impl Into<CourseId>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            course: course.into(),
            kind,
            name: None,
            location: None,
            size: Size::Unknown,
            modified: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_size(mut self, size: Size) -> Self {
        self.size = size;
        self
    }

    pub fn with_modified(mut self, modified: UtcDateTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// Runtime state shared between the worker that owns a [`Resource`] and
/// whoever observes it (progress rendering, shutdown).
#[derive(Debug, Default)]
pub struct Progress {
    transferred: AtomicU64,
    stop: AtomicBool,
    done: AtomicBool,
}

impl Progress {
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn reset_transferred(&self) {
        self.transferred.store(0, Ordering::Relaxed);
    }

    /// Ask the owning worker to stop after its current chunk.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Mark the resource complete. Returns `false` if it already was, which
    /// means something tried to process it twice.
    pub fn mark_done(&self) -> bool {
        !self.done.swap(true, Ordering::AcqRel)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// A resolved resource: the unit of work and of persistence.
#[derive(Debug, Clone)]
pub struct Resource {
    pub key: ResourceKey,
    /// Where the bytes actually come from. Usually equal to `key.url`.
    pub download_url: String,
    /// Sanitized file name.
    pub name: String,
    pub directory: PathBuf,
    pub size: Size,
    pub modified: Option<UtcDateTime>,
    pub checksum: Option<String>,
    /// Data kind the resource was discovered as.
    pub origin: MediaKind,
    /// Current kind: `origin`, or one of the terminal synthetic kinds.
    pub kind: MediaKind,
    /// Base resource whose file this one links to, when `kind` is
    /// [`MediaKind::Hardlink`].
    pub link_target: Option<ResourceKey>,
    /// Fingerprint of the first chunk received, set by a transfer.
    pub stream_checksum: Option<String>,
    pub newly_downloaded: bool,
    pub newly_discovered: bool,
    pub progress: Arc<Progress>,
}

impl Resource {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }

    pub fn url(&self) -> &str {
        &self.key.url
    }

    pub fn course(&self) -> CourseId {
        self.key.course
    }

    pub fn is_corrupted(&self) -> bool {
        self.kind == MediaKind::Corrupted
    }

    pub fn is_hardlink(&self) -> bool {
        self.kind == MediaKind::Hardlink
    }

    /// Build a resource from what a previous run persisted.
    pub fn from_record(record: CacheRecord, directory: PathBuf) -> Self {
        Self {
            key: ResourceKey::new(record.url, record.course),
            download_url: record.download_url,
            name: record.name,
            directory,
            size: record.size,
            modified: record.modified,
            checksum: record.checksum,
            origin: record.kind,
            kind: record.kind,
            link_target: None,
            stream_checksum: None,
            newly_downloaded: false,
            newly_discovered: false,
            progress: Arc::default(),
        }
    }

    pub fn to_record(&self) -> CacheRecord {
        CacheRecord {
            url: self.key.url.clone(),
            course: self.key.course,
            download_url: self.download_url.clone(),
            name: self.name.clone(),
            directory: self.directory.clone(),
            kind: self.origin,
            size: self.size,
            modified: self.modified,
            checksum: self.checksum.clone(),
            corrupted: self.is_corrupted(),
        }
    }

    /// Turn this resource into a hardlink of `base`: nothing is downloaded
    /// for it, and it reports the base's content metadata.
    pub fn link_to(&mut self, base: &Resource) {
        self.kind = MediaKind::Hardlink;
        self.link_target = Some(base.key.clone());
        self.checksum = base.checksum.clone();
        self.size = base.size;
        self.modified = base.modified;
        self.newly_downloaded = base.newly_downloaded;
        self.newly_discovered = base.newly_discovered;
    }
}

/// Insert `.{ordinal}` before the extension of `name`.
pub(crate) fn with_ordinal(name: &str, ordinal: usize) -> String {
    match name.rsplit_once('.') {
        // A leading dot marks a hidden file, not an extension.
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{ordinal}.{ext}"),
        _ => format!("{name}.{ordinal}"),
    }
}
