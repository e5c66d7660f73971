use crate::RunHandle;
use crate::error::{ErrorKind, Result};
use crate::retry::RetryPolicy;
use crate::transport::{Body, Credential, Transport};
use exn::ResultExt;
use futures::FutureExt;
use lectern_cache::Cache;
use lectern_catalog::{Resolution, Resource, needs_transfer};
use lectern_checksum::{Sampling, file_checksum, stream_checksum};
use lectern_model::{MediaKind, ResourceKey, Size};
use lectern_throttle::Throttle;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Upper bound of the worker pool. The throttle decides how many of
    /// them actually work.
    pub max_workers: usize,
    /// Bytes granted per throttle token.
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    /// Kinds whose failures are considered transient: they are never
    /// recorded as known-bad, so the next run tries again.
    pub trusted_kinds: Vec<MediaKind>,
    /// Completion polling interval while shutting down.
    #[serde(with = "lectern_model::millis")]
    pub shutdown_poll: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_workers: 6,
            chunk_size: 64 * 1024,
            retry: RetryPolicy::default(),
            trusted_kinds: vec![MediaKind::Video],
            shutdown_poll: Duration::from_millis(250),
        }
    }
}

enum Transfer {
    Complete,
    Stopped,
}

type Queue = Arc<Mutex<VecDeque<Resource>>>;

/// Drives resolved resources to completion.
///
/// Resources whose file is already in place are settled up front. The rest
/// go into a queue drained by a pool of workers; worker `n` only pulls work
/// while the throttle's target worker count is above `n`. Hardlinks are
/// materialised last, once their bases are done.
#[derive(Clone)]
pub struct Scheduler {
    transport: Arc<dyn Transport>,
    credential: Credential,
    cache: Cache,
    throttle: Arc<Throttle>,
    sampling: Arc<Sampling>,
    settings: Arc<SchedulerSettings>,
    stream: Option<ResourceKey>,
    handle: RunHandle,
}

impl Scheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        credential: Credential,
        cache: Cache,
        throttle: Arc<Throttle>,
        sampling: Sampling,
        settings: SchedulerSettings,
    ) -> Self {
        let handle = RunHandle::new(CancellationToken::new(), settings.shutdown_poll);
        Self {
            transport,
            credential,
            cache,
            throttle,
            sampling: Arc::new(sampling),
            settings: Arc::new(settings),
            stream: None,
            handle,
        }
    }

    /// Scheduled first, and throttled through the streaming allowance.
    pub fn with_stream(mut self, key: ResourceKey) -> Self {
        self.stream = Some(key);
        self
    }

    /// Share cancellation with a wider context.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.handle = RunHandle::new(cancel, self.settings.shutdown_poll);
        self
    }

    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    fn is_stopping(&self, resource: &Resource) -> bool {
        self.handle.is_stopped() || resource.progress.is_stopped()
    }

    /// Run every resource of `resolution` to a terminal state and return
    /// them, sorted by identity.
    pub async fn run(&self, resolution: Resolution) -> Vec<Resource> {
        let Resolution { resources, hardlinks } = resolution;
        self.handle.register(resources.iter().chain(&hardlinks)).await;

        let mut finished = Vec::with_capacity(resources.len() + hardlinks.len());
        let mut queue = VecDeque::new();
        for resource in resources {
            if !self.is_stopping(&resource) && needs_transfer(&resource, &self.sampling).await {
                if self.stream.as_ref() == Some(&resource.key) {
                    queue.push_front(resource);
                } else {
                    queue.push_back(resource);
                }
            } else {
                finished.push(self.settle(resource));
            }
        }
        info!(target: "download", satisfied = finished.len(), queued = queue.len(), links = hardlinks.len(), "scheduling");

        let queue: Queue = Arc::new(Mutex::new(queue));
        let drained = CancellationToken::new();
        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.max_workers.max(1) {
            let this = self.clone();
            let (queue, drained) = (Arc::clone(&queue), drained.clone());
            workers.spawn(async move { this.work(worker_id, queue, drained).await });
        }
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => finished.extend(done),
                Err(e) => {
                    error!(target: "download", error = ?e, "worker died, its resource is lost");
                    // Parked workers only wake on a target change, which may never come.
                    drained.cancel();
                },
            }
        }
        let leftover: Vec<Resource> = queue.lock().await.drain(..).collect();
        for resource in leftover {
            warn!(target: "download", url = %resource.url(), "no worker left to download");
            finished.push(self.settle(resource));
        }

        let links = self.materialise(hardlinks, &finished).await;
        finished.extend(links);
        finished.sort_by(|a, b| a.key.cmp(&b.key));
        finished
    }

    /// Complete a resource that needs no transfer.
    fn settle(&self, resource: Resource) -> Resource {
        if !resource.progress.mark_done() {
            error!(target: "download", url = %resource.url(), "resource completed twice");
        }
        resource
    }

    async fn work(&self, worker_id: usize, queue: Queue, drained: CancellationToken) -> Vec<Resource> {
        let mut target = self.throttle.workers();
        let cancel = self.handle.cancellation();
        let mut done = Vec::new();
        loop {
            while worker_id >= *target.borrow_and_update() && !cancel.is_cancelled() {
                tokio::select! {
                    changed = target.changed() => if changed.is_err() { break },
                    () = drained.cancelled() => return done,
                    () = cancel.cancelled() => break,
                }
            }
            let next = queue.lock().await.pop_front();
            let Some(resource) = next else {
                drained.cancel();
                return done;
            };
            let fallback = resource.clone();
            match AssertUnwindSafe(self.process(worker_id, resource)).catch_unwind().await {
                Ok(resource) => done.push(resource),
                Err(_) => {
                    error!(target: "download", worker = worker_id, url = %fallback.url(), "resource processing panicked");
                    fallback.progress.mark_done();
                    done.push(fallback);
                },
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(worker = worker_id, url = %resource.download_url))]
    async fn process(&self, worker_id: usize, mut resource: Resource) -> Resource {
        if resource.progress.is_done() {
            error!(target: "download", url = %resource.url(), "completed resource re-entered processing");
            return resource;
        }
        if self.is_stopping(&resource) || resource.kind.is_terminal() {
            return self.settle(resource);
        }

        let streaming = self.stream.as_ref() == Some(&resource.key);
        if streaming {
            self.throttle.start_stream(resource.path()).await;
        }
        let outcome = self.transfer(&mut resource).await;
        if streaming {
            self.throttle.end_stream().await;
        }

        match outcome {
            Ok(Transfer::Complete) => self.complete(&mut resource).await,
            Ok(Transfer::Stopped) => debug!(target: "download", path = %resource.path().display(), "transfer stopped"),
            Err(e) => {
                warn!(target: "download", url = %resource.download_url, error = ?e, "transfer failed, marking corrupted");
                self.corrupt(&mut resource).await;
            },
        }
        self.settle(resource)
    }

    async fn transfer(&self, resource: &mut Resource) -> Result<Transfer> {
        let cancel = self.handle.cancellation();
        let path = resource.path();
        let Some(mut body) = self.connect(&resource.download_url).await? else {
            return Ok(Transfer::Stopped);
        };
        let declared = body.content_length();
        let write_error = || ErrorKind::Write(path.clone());
        let mut file = tokio::fs::File::create(&path).await.or_raise(write_error)?;
        resource.progress.reset_transferred();
        resource.stream_checksum = None;
        let window = self.sampling.window_for(&path);
        let mut head = Vec::new();

        let mut received: u64 = 0;
        loop {
            if self.is_stopping(resource) {
                // Never leave a partial file that looks complete.
                file.set_len(0).await.or_raise(write_error)?;
                return Ok(Transfer::Stopped);
            }
            let token = tokio::select! {
                biased;
                () = cancel.cancelled() => continue,
                token = self.throttle.acquire(&path) => token,
            };
            let Some(chunk) = self.read_chunk(body.as_mut(), token.bytes).await? else {
                continue;
            };
            if chunk.is_empty() {
                break;
            }
            if resource.stream_checksum.is_none() {
                let wanted = window.saturating_sub(head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..wanted]);
                if head.len() >= window {
                    resource.stream_checksum = Some(stream_checksum(&head, declared));
                }
            }
            file.write_all(&chunk).await.or_raise(write_error)?;
            let length = chunk.len() as u64;
            received += length;
            resource.progress.add_transferred(length);
        }
        file.flush().await.or_raise(write_error)?;
        if resource.stream_checksum.is_none() && !head.is_empty() {
            resource.stream_checksum = Some(stream_checksum(&head, declared));
        }

        if let Some(expected) = declared
            && received < expected
        {
            exn::bail!(ErrorKind::Truncated { expected, received });
        }
        Ok(Transfer::Complete)
    }

    /// Connect with retries. `None` when cancelled first.
    async fn connect(&self, url: &str) -> Result<Option<Box<dyn Body>>> {
        let cancel = self.handle.cancellation();
        let policy = &self.settings.retry;
        for attempt in 0..policy.connect_attempts.max(1) {
            if attempt > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(None),
                    () = tokio::time::sleep(policy.static_sleep) => {},
                }
            }
            let timeout = policy.timeout(attempt);
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                opened = tokio::time::timeout(timeout, self.transport.open(url, &self.credential)) => opened,
            };
            match opened {
                Ok(Ok(body)) => return Ok(Some(body)),
                Ok(Err(e)) if !policy.should_retry(&e, attempt) => {
                    return Err(e).or_raise(|| ErrorKind::Connect(url.to_string()));
                },
                Ok(Err(e)) => debug!(target: "download", url, attempt, error = ?e, "connection attempt failed"),
                Err(_) => debug!(target: "download", url, attempt, ?timeout, "connection attempt timed out"),
            }
        }
        exn::bail!(ErrorKind::Connect(url.to_string()))
    }

    /// Read one chunk with retries. `None` when cancelled first.
    async fn read_chunk(&self, body: &mut dyn Body, max: usize) -> Result<Option<Vec<u8>>> {
        let cancel = self.handle.cancellation();
        let policy = &self.settings.retry;
        for attempt in 0..policy.read_attempts.max(1) {
            let timeout = policy.timeout(attempt);
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                read = tokio::time::timeout(timeout, body.read(max)) => read,
            };
            match read {
                Ok(Ok(chunk)) => return Ok(Some(chunk)),
                Ok(Err(e)) if !e.is_retryable() => return Err(e).or_raise(|| ErrorKind::Read),
                Ok(Err(e)) => debug!(target: "download", attempt, error = ?e, "chunk read failed"),
                Err(_) => debug!(target: "download", attempt, ?timeout, "chunk read timed out"),
            }
        }
        exn::bail!(ErrorKind::Read)
    }

    async fn complete(&self, resource: &mut Resource) {
        let path = resource.path();
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => resource.size = Size::Bytes(metadata.len()),
            Err(e) => warn!(target: "download", path = %path.display(), error = ?e, "downloaded file vanished"),
        }
        resource.checksum = file_checksum(&path, &self.sampling)
            .await
            .inspect_err(|e| warn!(target: "download", path = %path.display(), error = ?e, "could not checksum"))
            .ok();
        resource.kind = resource.origin;
        resource.newly_downloaded = true;
        self.cache.upsert(&resource.to_record()).await;
        let workers = self.throttle.record_completion().await;
        info!(target: "download", path = %path.display(), size = %resource.size, workers, "downloaded");
    }

    async fn corrupt(&self, resource: &mut Resource) {
        resource.kind = MediaKind::Corrupted;
        resource.size = Size::Bytes(0);
        resource.checksum = None;
        let path = resource.path();
        if let Err(e) = truncate(&path).await {
            warn!(target: "download", path = %path.display(), error = ?e, "could not truncate corrupted file");
        }
        if self.settings.trusted_kinds.contains(&resource.origin) {
            debug!(target: "download", url = %resource.url(), kind = %resource.origin, "not recording trusted kind as bad");
        } else {
            self.cache.mark_bad(resource.url(), resource.origin).await;
        }
        self.cache.upsert(&resource.to_record()).await;
    }

    /// Put every hardlink's file in place once its base is done.
    async fn materialise(&self, hardlinks: Vec<Resource>, finished: &[Resource]) -> Vec<Resource> {
        let bases: HashMap<&ResourceKey, &Resource> = finished.iter().map(|r| (&r.key, r)).collect();
        let mut done = Vec::with_capacity(hardlinks.len());
        for mut link in hardlinks {
            if link.progress.is_done() {
                error!(target: "download", url = %link.url(), "completed hardlink re-entered processing");
                done.push(link);
                continue;
            }
            let base = link.link_target.as_ref().and_then(|key| bases.get(key));
            match base {
                _ if self.is_stopping(&link) => {},
                None => error!(target: "download", url = %link.url(), "hardlink without a base"),
                Some(base) if base.is_corrupted() => self.corrupt(&mut link).await,
                Some(base) => {
                    link.checksum = base.checksum.clone();
                    link.size = base.size;
                    link.modified = base.modified;
                    link.newly_downloaded = base.newly_downloaded;
                    let (source, target) = (base.path(), link.path());
                    match link_file(&source, &target).await {
                        Ok(()) => self.cache.upsert(&link.to_record()).await,
                        Err(e) => {
                            warn!(target: "download", path = %target.display(), error = ?e, "could not materialise link");
                            self.corrupt(&mut link).await;
                        },
                    }
                },
            }
            done.push(self.settle(link));
        }
        done
    }
}

async fn truncate(path: &Path) -> Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .or_raise(|| ErrorKind::Write(path.to_path_buf()))?;
    Ok(())
}

/// Hard link `target` to `source`, copying when linking isn't possible.
async fn link_file(source: &Path, target: &Path) -> Result<()> {
    if source == target {
        return Ok(());
    }
    let link_error = || ErrorKind::Link(target.to_path_buf());
    match tokio::fs::remove_file(target).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e).or_raise(link_error),
        _ => {},
    }
    if let Err(e) = tokio::fs::hard_link(source, target).await {
        debug!(target: "download", path = %target.display(), error = ?e, "hard link failed, copying");
        tokio::fs::copy(source, target).await.or_raise(link_error)?;
    }
    Ok(())
}
