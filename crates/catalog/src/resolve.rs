use crate::error::{ErrorKind, Result};
use crate::{CandidateResource, Resource};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use lectern_cache::{Cache, Lookup};
use lectern_checksum::{Sampling, digest, file_checksum};
use lectern_model::{Course, CourseId, ResourceKey, sanitize_name};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Candidates resolved at the same time.
const MAX_RESOLVE_CONCURRENCY: usize = 32;
/// Length of the fallback name derived from the download URL's digest.
const FALLBACK_NAME_LENGTH: usize = 10;

/// Supplies an alternative download URL for an identity URL, e.g. by
/// following a redirect-like landing page.
#[async_trait]
pub trait Indirection: Send + Sync {
    /// `None` means "download from the identity URL".
    async fn download_url(&self, url: &str) -> Option<String>;
}

/// Turns [`CandidateResource`]s into [`Resource`]s.
///
/// Construct once per run: it holds the set of courses the run knows about.
pub struct Resolver {
    cache: Cache,
    root: PathBuf,
    subdivide: bool,
    courses: HashMap<CourseId, Course>,
    indirection: Option<Arc<dyn Indirection>>,
}

impl Resolver {
    pub fn new(
        cache: Cache,
        root: impl Into<PathBuf>,
        subdivide: bool,
        courses: impl IntoIterator<Item = Course>,
    ) -> Self {
        Self {
            cache,
            root: root.into(),
            subdivide,
            courses: courses.into_iter().map(|c| (c.id, c)).collect(),
            indirection: None,
        }
    }

    pub fn with_indirection(mut self, indirection: Arc<dyn Indirection>) -> Self {
        self.indirection = Some(indirection);
        self
    }

    pub fn course(&self, id: CourseId) -> Option<&Course> {
        self.courses.get(&id)
    }

    /// Directory a candidate is written to.
    ///
    /// `<root>/<course>[/<location or kind directory>]`, where the
    /// subdirectory only exists when subdivision is enabled.
    fn directory_for(&self, course: &Course, candidate: &CandidateResource) -> PathBuf {
        let mut directory = self.root.join(&course.name);
        if !self.subdivide {
            return directory;
        }
        let location = candidate.location.as_deref().or_else(|| candidate.kind.dir_name()).unwrap_or_default();
        for component in location.split('/').map(str::trim).filter(|c| !c.is_empty()) {
            directory.push(sanitize_name(component));
        }
        directory
    }

    /// Resolve one candidate.
    ///
    /// Returns `Ok(None)` when the URL is known to be bad. The target
    /// directory exists once this returns a resource.
    #[instrument(level = "debug", skip_all, fields(url = %candidate.url, course = %candidate.course))]
    pub async fn resolve(&self, candidate: CandidateResource) -> Result<Option<Resource>> {
        let course = self.course(candidate.course).ok_or_raise(|| ErrorKind::UnknownCourse(candidate.course))?;
        let directory = self.directory_for(course, &candidate);

        let resource = match self.cache.lookup(&candidate.url, candidate.course).await {
            Lookup::KnownBad => {
                debug!(target: "resolve", url = %candidate.url, "skipping known-bad url");
                return Ok(None);
            },
            Lookup::Record(record) => Resource::from_record(record, directory),
            Lookup::Unknown => self.discover(candidate, directory).await,
        };
        tokio::fs::create_dir_all(&resource.directory)
            .await
            .or_raise(|| ErrorKind::Directory(resource.directory.clone()))?;
        Ok(Some(resource))
    }

    async fn discover(&self, candidate: CandidateResource, directory: PathBuf) -> Resource {
        let download_url = match &self.indirection {
            Some(indirection) => indirection.download_url(&candidate.url).await,
            None => None,
        }
        .unwrap_or_else(|| candidate.url.clone());
        let name = match candidate.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => name_from_url(&download_url),
        };
        Resource {
            key: ResourceKey::new(candidate.url, candidate.course),
            download_url,
            name: sanitize_name(&name),
            directory,
            size: candidate.size,
            modified: candidate.modified,
            checksum: None,
            origin: candidate.kind,
            kind: candidate.kind,
            link_target: None,
            stream_checksum: None,
            newly_downloaded: false,
            newly_discovered: true,
            progress: Arc::default(),
        }
    }

    /// Resolve every candidate, concurrently.
    ///
    /// Candidates that fail to resolve are logged and dropped; the run goes
    /// on without them. The result is sorted by identity.
    pub async fn resolve_all(&self, candidates: Vec<CandidateResource>) -> Vec<Resource> {
        let mut pending = candidates.into_iter();
        let mut processing = FuturesUnordered::new();
        processing.extend(pending.by_ref().take(MAX_RESOLVE_CONCURRENCY).map(|c| self.resolve_logged(c)));
        let mut resolved = Vec::new();
        while let Some(result) = processing.next().await {
            resolved.extend(result);
            // Pop-n-push.
            if let Some(next) = pending.next() {
                processing.push(self.resolve_logged(next));
            }
        }
        resolved.sort_by(|a, b| a.key.cmp(&b.key));
        resolved
    }

    async fn resolve_logged(&self, candidate: CandidateResource) -> Option<Resource> {
        let url = candidate.url.clone();
        match self.resolve(candidate).await {
            Ok(resource) => resource,
            Err(e) => {
                warn!(target: "resolve", %url, error = ?e, "could not resolve candidate");
                None
            },
        }
    }
}

/// Derive a file name from a URL: the last path segment, else the host,
/// else a short digest of the whole URL.
fn name_from_url(download_url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(download_url) {
        let path = parsed.path().trim_end_matches('/');
        if let Some(segment) = path.rsplit('/').next().filter(|s| !s.is_empty()) {
            return segment.to_string();
        }
        if let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) {
            return host.to_string();
        }
    }
    digest(download_url.as_bytes()).chars().take(FALLBACK_NAME_LENGTH).collect()
}

/// Whether `resource` needs a network transfer.
///
/// Terminal and completed resources never do, and newly discovered ones
/// always do. A previously downloaded resource is satisfied when its file
/// has the recorded byte size, or, failing that, the recorded checksum. A
/// missing or empty file always needs a transfer.
pub async fn needs_transfer(resource: &Resource, sampling: &Sampling) -> bool {
    if resource.progress.is_done() || resource.kind.is_terminal() {
        return false;
    }
    if resource.newly_discovered {
        return true;
    }
    let path = resource.path();
    let on_disk = file_length(&path).await;
    if on_disk == 0 {
        return true;
    }
    if resource.size.bytes() == Some(on_disk) {
        return false;
    }
    let Some(expected) = &resource.checksum else {
        return true;
    };
    match file_checksum(&path, sampling).await {
        Ok(actual) => actual != *expected,
        Err(e) => {
            warn!(target: "resolve", path = %path.display(), error = ?e, "could not checksum existing file");
            true
        },
    }
}

async fn file_length(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_cache::{CacheRecord, Database, Repository};
    use lectern_model::{MediaKind, Size};
    use rstest::rstest;

    struct Redirect;

    #[async_trait]
    impl Indirection for Redirect {
        async fn download_url(&self, url: &str) -> Option<String> {
            url.strip_prefix("https://lms.example/view/").map(|id| format!("https://files.example/{id}/"))
        }
    }

    async fn cache() -> (Database, Cache) {
        let db = Database::connect_in_memory().await.unwrap();
        let cache = Cache::from_repository(Repository::from(&db));
        (db, cache)
    }

    fn courses() -> Vec<Course> {
        vec![Course::new(5, "Analysis I")]
    }

    #[rstest]
    #[case("https://files.example/a/b/slides.pdf", "slides.pdf")]
    #[case("https://files.example/a/b/", "b")]
    #[case("https://files.example/", "files.example")]
    #[case("https://files.example", "files.example")]
    fn test_name_from_url(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(name_from_url(url), expected);
    }

    #[test]
    fn test_name_from_url_falls_back_to_digest() {
        let name = name_from_url("not a url");
        assert_eq!(name.len(), 10);
        assert_eq!(name, name_from_url("not a url"));
        assert_ne!(name, name_from_url("also not a url"));
    }

    #[tokio::test]
    async fn test_discover_new_resource() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, cache) = cache().await;
        let resolver = Resolver::new(cache, dir.path(), true, courses());
        let candidate = CandidateResource::new("https://files.example/x/Week%201.pdf", 5, MediaKind::Document)
            .with_size(Size::Bytes(10));
        let resource = resolver.resolve(candidate).await.unwrap().unwrap();
        assert_eq!(resource.name, "Week 1.pdf");
        assert_eq!(resource.directory, dir.path().join("Analysis I"));
        assert!(resource.directory.is_dir());
        assert!(resource.newly_discovered);
        assert_eq!(resource.download_url, "https://files.example/x/Week%201.pdf");
        assert_eq!(resource.size, Size::Bytes(10));
    }

    #[rstest]
    #[case(true, None, MediaKind::Video, "Analysis I/Videos")]
    #[case(true, Some("/Exercises/Sheet 1/"), MediaKind::Document, "Analysis I/Exercises/Sheet 1")]
    #[case(true, Some("a/../b"), MediaKind::Document, "Analysis I/a/_/b")]
    #[case(false, Some("Exercises"), MediaKind::Video, "Analysis I")]
    #[tokio::test]
    async fn test_directories(
        #[case] subdivide: bool,
        #[case] location: Option<&str>,
        #[case] kind: MediaKind,
        #[case] expected: &str,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(Cache::disabled(), dir.path(), subdivide, courses());
        let mut candidate = CandidateResource::new("https://files.example/v.mp4", 5, kind);
        if let Some(location) = location {
            candidate = candidate.with_location(location);
        }
        let resource = resolver.resolve(candidate).await.unwrap().unwrap();
        assert_eq!(resource.directory, dir.path().join(expected));
    }

    #[tokio::test]
    async fn test_declared_name_and_indirection() {
        let dir = tempfile::tempdir().unwrap();
        let resolver =
            Resolver::new(Cache::disabled(), dir.path(), false, courses()).with_indirection(Arc::new(Redirect));
        let candidate = CandidateResource::new("https://lms.example/view/17", 5, MediaKind::Document);
        let resource = resolver.resolve(candidate.clone()).await.unwrap().unwrap();
        assert_eq!(resource.download_url, "https://files.example/17/");
        assert_eq!(resource.name, "17");
        let resource = resolver.resolve(candidate.with_name("  Notes/Draft.pdf ")).await.unwrap().unwrap();
        assert_eq!(resource.name, "Notes-Draft.pdf");
    }

    #[tokio::test]
    async fn test_known_bad_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, cache) = cache().await;
        cache.mark_bad("https://files.example/broken.pdf", MediaKind::Document).await;
        let resolver = Resolver::new(cache, dir.path(), true, courses());
        let candidate = CandidateResource::new("https://files.example/broken.pdf", 5, MediaKind::Document);
        assert!(resolver.resolve(candidate).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_record_is_hydrated() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, cache) = cache().await;
        cache
            .upsert(&CacheRecord {
                url: "https://lms.example/view/1".to_string(),
                course: CourseId(5),
                download_url: "https://files.example/1/".to_string(),
                name: "renamed.0.pdf".to_string(),
                directory: PathBuf::from("/somewhere/else"),
                kind: MediaKind::Document,
                size: Size::Bytes(3),
                modified: None,
                checksum: Some("abc".to_string()),
                corrupted: false,
            })
            .await;
        // The indirection must not be consulted for cached resources.
        let resolver = Resolver::new(cache, dir.path(), false, courses()).with_indirection(Arc::new(Redirect));
        let candidate = CandidateResource::new("https://lms.example/view/1", 5, MediaKind::Document);
        let resource = resolver.resolve(candidate).await.unwrap().unwrap();
        assert!(!resource.newly_discovered);
        assert_eq!(resource.name, "renamed.0.pdf");
        assert_eq!(resource.download_url, "https://files.example/1/");
        assert_eq!(resource.directory, dir.path().join("Analysis I"));
        assert_eq!(resource.checksum.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_unknown_course() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(Cache::disabled(), dir.path(), true, courses());
        let candidate = CandidateResource::new("https://files.example/a.pdf", 6, MediaKind::Document);
        let err = resolver.resolve(candidate).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownCourse(CourseId(6))));
    }

    #[tokio::test]
    async fn test_resolve_all_is_sorted_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(Cache::disabled(), dir.path(), true, courses());
        let candidates = (0..50)
            .rev()
            .map(|i| {
                let course = if i == 7 { 6 } else { 5 };
                CandidateResource::new(format!("https://files.example/{i:02}.pdf"), course, MediaKind::Document)
            })
            .collect();
        let resolved = resolver.resolve_all(candidates).await;
        assert_eq!(resolved.len(), 49);
        assert!(resolved.windows(2).all(|w| w[0].key < w[1].key));
    }

    fn hydrated(dir: &Path, name: &str, size: Size, checksum: Option<String>) -> Resource {
        let mut resource = crate::resource::tests::resource("https://a", 1, name);
        resource.directory = dir.to_path_buf();
        resource.size = size;
        resource.checksum = checksum;
        resource.newly_discovered = false;
        resource
    }

    #[tokio::test]
    async fn test_needs_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let sampling = Sampling::default();
        std::fs::write(dir.path().join("present.pdf"), b"hello").unwrap();
        std::fs::write(dir.path().join("empty.pdf"), b"").unwrap();
        let checksum = file_checksum(&dir.path().join("present.pdf"), &sampling).await.unwrap();

        // Matching byte size.
        assert!(!needs_transfer(&hydrated(dir.path(), "present.pdf", Size::Bytes(5), None), &sampling).await);
        // Size unknown, matching checksum.
        let resource = hydrated(dir.path(), "present.pdf", Size::Seconds(60), Some(checksum.clone()));
        assert!(!needs_transfer(&resource, &sampling).await);
        // Size unknown, checksum differs.
        let resource = hydrated(dir.path(), "present.pdf", Size::Unknown, Some("nope".to_string()));
        assert!(needs_transfer(&resource, &sampling).await);
        // Size unknown, no checksum.
        assert!(needs_transfer(&hydrated(dir.path(), "present.pdf", Size::Unknown, None), &sampling).await);
        // Missing and empty files.
        assert!(needs_transfer(&hydrated(dir.path(), "missing.pdf", Size::Bytes(5), None), &sampling).await);
        assert!(needs_transfer(&hydrated(dir.path(), "empty.pdf", Size::Bytes(0), None), &sampling).await);
        // Newly discovered always needs a transfer.
        let mut fresh = hydrated(dir.path(), "present.pdf", Size::Bytes(5), None);
        fresh.newly_discovered = true;
        assert!(needs_transfer(&fresh, &sampling).await);
        // Terminal and finished resources never do.
        let mut link = fresh.clone();
        link.kind = MediaKind::Hardlink;
        assert!(!needs_transfer(&link, &sampling).await);
        let done = hydrated(dir.path(), "missing.pdf", Size::Unknown, None);
        done.progress.mark_done();
        assert!(!needs_transfer(&done, &sampling).await);
    }
}
