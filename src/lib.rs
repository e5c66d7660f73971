//! lectern keeps a local mirror of course material up to date.
//!
//! A run goes through four stages:
//!
//! 1. candidates from catalog discovery are resolved against the cache
//!    ([`lectern_catalog::Resolver`]);
//! 2. duplicates are turned into hardlinks and colliding names are
//!    renamed ([`lectern_catalog::resolve_conflicts`]);
//! 3. what is missing is downloaded by a throttled worker pool
//!    ([`lectern_download::Scheduler`]);
//! 4. the outcome is summarised in a [`Changelog`].
//!
//! Everything a run needs lives in one [`Context`]; nothing is global.

pub mod error;
pub mod logging;

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use lectern_cache::Cache;
use lectern_catalog::{CandidateResource, Indirection, Resolver, resolve_conflicts};
use lectern_config::Config;
use lectern_download::{Credential, HttpTransport, RunHandle, Scheduler, Transport};
use lectern_model::{Course, ResourceKey};
use lectern_throttle::Throttle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use lectern_download::{Changelog, Summary};

/// Catalog discovery, as far as a run is concerned.
#[async_trait]
pub trait Catalog: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Courses the user can see. A failure here ends the run.
    async fn courses(&self) -> std::result::Result<Vec<Course>, Self::Error>;

    /// Everything downloadable in `courses`.
    async fn candidates(&self, courses: &[Course]) -> Vec<CandidateResource>;
}

/// Run-scoped state shared by every component.
pub struct Context {
    pub config: Config,
    pub cache: Cache,
    pub throttle: Arc<Throttle>,
    pub transport: Arc<dyn Transport>,
    pub credential: Credential,
    pub cancel: CancellationToken,
}

impl Context {
    /// Build a context. Without a usable credential there is nothing to do.
    pub async fn new(config: Config, credential: Option<Credential>, transport: Arc<dyn Transport>) -> Result<Self> {
        let credential = credential.filter(|c| !c.is_empty()).ok_or_raise(|| ErrorKind::Credential)?;
        if let Some(parent) = config.paths.cache.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(target: "lectern", path = %parent.display(), error = ?e, "could not create cache directory");
        }
        let cache = Cache::open(&config.paths.cache).await;
        let throttle = Arc::new(Throttle::new(&config.throttle, config.download.chunk_size, config.download.max_workers));
        Ok(Self { config, cache, throttle, transport, credential, cancel: CancellationToken::new() })
    }

    /// Build a context that downloads over HTTP(S).
    pub async fn with_http(config: Config, credential: Option<Credential>) -> Result<Self> {
        let transport = HttpTransport::new().or_raise(|| ErrorKind::Transport)?;
        Self::new(config, credential, Arc::new(transport)).await
    }

    pub async fn close(&self) {
        self.cache.close().await;
    }
}

pub struct Engine {
    context: Context,
    scheduler: Scheduler,
    indirection: Option<Arc<dyn Indirection>>,
}

impl Engine {
    pub fn new(context: Context) -> Self {
        let scheduler = Scheduler::new(
            Arc::clone(&context.transport),
            context.credential.clone(),
            context.cache.clone(),
            Arc::clone(&context.throttle),
            context.config.checksum.clone(),
            context.config.download.clone(),
        )
        .with_cancellation(context.cancel.clone());
        Self { context, scheduler, indirection: None }
    }

    pub fn with_indirection(mut self, indirection: Arc<dyn Indirection>) -> Self {
        self.indirection = Some(indirection);
        self
    }

    /// Download `key` first, through the streaming allowance.
    pub fn with_stream(mut self, key: ResourceKey) -> Self {
        self.scheduler = self.scheduler.with_stream(key);
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn handle(&self) -> RunHandle {
        self.scheduler.handle()
    }

    /// Discover, resolve and download everything `catalog` offers.
    pub async fn run<C: Catalog>(&self, catalog: &C) -> Result<Changelog> {
        let courses = catalog.courses().await.or_raise(|| ErrorKind::CourseList)?;
        let candidates = catalog.candidates(&courses).await;
        Ok(self.process(courses, candidates).await)
    }

    /// Resolve and download `candidates`. Candidates of courses missing from
    /// `courses`, or excluded by the course filter, are ignored.
    pub async fn process(&self, courses: Vec<Course>, candidates: Vec<CandidateResource>) -> Changelog {
        let config = &self.context.config;
        let cache = &self.context.cache;
        let courses: Vec<Course> = courses.into_iter().filter(|course| config.courses.includes(course.id)).collect();
        for course in &courses {
            cache.add_course(course).await;
        }
        let evicted = cache.evict_bad_for_kinds(&config.download.trusted_kinds).await;
        if evicted > 0 {
            info!(target: "lectern", evicted, "forgot known-bad urls of trusted kinds");
        }

        let mut resolver = Resolver::new(cache.clone(), &config.paths.root, config.subdivide, courses);
        if let Some(indirection) = &self.indirection {
            resolver = resolver.with_indirection(Arc::clone(indirection));
        }
        let candidates: Vec<_> =
            candidates.into_iter().filter(|candidate| resolver.course(candidate.course).is_some()).collect();
        let resolved = resolver.resolve_all(candidates).await;

        let resolution = resolve_conflicts(resolved);
        let resources = self.scheduler.run(resolution).await;
        let changelog = Changelog::from_resources(&resources);
        let summary = changelog.summary;
        info!(
            target: "lectern",
            downloaded = summary.downloaded,
            discovered = summary.discovered,
            corrupted = summary.corrupted,
            hardlinks = summary.hardlinks,
            "run complete"
        );
        changelog
    }

    /// Stop cooperatively and wait until every resource has settled.
    pub async fn shutdown(&self) {
        self.scheduler.handle().shutdown().await;
    }
}
