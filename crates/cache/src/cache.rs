use crate::{CacheRecord, Database, Lookup, Repository};
use lectern_model::{Course, CourseId, MediaKind};
use std::path::Path;
use tracing::{debug, warn};

/// Cache façade that never fails.
///
/// Every error coming out of the [`Repository`] is logged and replaced with
/// the "nothing is known" answer: lookups become [`Lookup::Unknown`], writes
/// become no-ops. A cache that could not be opened at all is simply
/// disabled for the rest of the run.
#[derive(Debug, Clone)]
pub struct Cache {
    db: Option<Database>,
    repo: Option<Repository>,
}

impl Cache {
    /// Open (or create) the cache database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Database::connect(path).await {
            Ok(db) => {
                debug!(target: "cache", path = %path.display(), "cache opened");
                Self { repo: Some(Repository::from(&db)), db: Some(db) }
            },
            Err(e) => {
                warn!(target: "cache", path = %path.display(), error = ?e, "cache unavailable, continuing without it");
                Self::disabled()
            },
        }
    }

    /// A cache that knows nothing and remembers nothing.
    pub fn disabled() -> Self {
        Self { db: None, repo: None }
    }

    pub fn from_repository(repo: Repository) -> Self {
        Self { db: None, repo: Some(repo) }
    }

    pub fn is_enabled(&self) -> bool {
        self.repo.is_some()
    }

    pub async fn lookup(&self, url: &str, course: CourseId) -> Lookup {
        let Some(repo) = &self.repo else {
            return Lookup::Unknown;
        };
        match repo.lookup(url, course).await {
            Ok(found) => found,
            Err(e) => {
                warn!(target: "cache", url, %course, error = ?e, "cache lookup failed, treating as unknown");
                Lookup::Unknown
            },
        }
    }

    pub async fn upsert(&self, record: &CacheRecord) {
        let Some(repo) = &self.repo else { return };
        if let Err(e) = repo.upsert(record).await {
            let (url, course) = (&record.url, record.course);
            warn!(target: "cache", %url, %course, error = ?e, "failed to persist resource");
        }
    }

    pub async fn mark_bad(&self, url: &str, kind: MediaKind) {
        let Some(repo) = &self.repo else { return };
        if let Err(e) = repo.mark_bad(url, kind).await {
            warn!(target: "cache", url, error = ?e, "failed to record known-bad url");
        }
    }

    pub async fn evict_bad(&self, url: &str) -> bool {
        let Some(repo) = &self.repo else { return false };
        repo.evict_bad(url)
            .await
            .inspect_err(|e| warn!(target: "cache", url, error = ?e, "failed to evict known-bad url"))
            .unwrap_or(false)
    }

    pub async fn evict_bad_for_kinds(&self, kinds: &[MediaKind]) -> u64 {
        let Some(repo) = &self.repo else { return 0 };
        repo.evict_bad_for_kinds(kinds)
            .await
            .inspect_err(|e| warn!(target: "cache", ?kinds, error = ?e, "failed to evict known-bad urls"))
            .unwrap_or(0)
    }

    pub async fn list_courses(&self) -> Vec<Course> {
        let Some(repo) = &self.repo else { return Vec::new() };
        repo.list_courses()
            .await
            .inspect_err(|e| warn!(target: "cache", error = ?e, "failed to list cached courses"))
            .unwrap_or_default()
    }

    pub async fn add_course(&self, course: &Course) {
        let Some(repo) = &self.repo else { return };
        if let Err(e) = repo.add_course(course).await {
            warn!(target: "cache", course = %course.id, error = ?e, "failed to persist course");
        }
    }

    /// Close the underlying database, if this cache opened one.
    pub async fn close(&self) {
        if let Some(db) = &self.db {
            db.close().await;
        }
    }
}
