//! Archive, upload, build, wait, clean up.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cloudbuild::{Build, BuildService, BuildStatus};
use crate::compressor::{ArchiveStream, archive_stream};
use crate::config::{self, CleanupPolicy, Config};
use crate::error::CdbuildError;
use crate::orphans::{LedgerFile, OrphanEntry};
use crate::poll::PollPolicy;
use crate::storage::ObjectStore;

/// Result of a run that reached a terminal build status.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub build_id: String,
    pub status: BuildStatus,
    pub staging_bucket: String,
    pub build_object: String,
    /// `false` only with [`CleanupPolicy::Lenient`] when the delete failed.
    pub cleaned_up: bool,
}

#[derive(Debug)]
pub enum WaitOutcome {
    Finished(Build),
    TimedOut(Duration),
    Interrupted,
}

pub struct Pipeline {
    storage: Arc<dyn ObjectStore>,
    builds: Arc<dyn BuildService>,
    ledger: LedgerFile,
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config, storage: Arc<dyn ObjectStore>, builds: Arc<dyn BuildService>) -> Self {
        let ledger = config
            .orphan_ledger
            .clone()
            .map(LedgerFile::at)
            .unwrap_or_else(LedgerFile::default_location);
        Self {
            storage,
            builds,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every stage in order. `shutdown` resolving while the build is in
    /// flight cancels the build; the uploaded source is deleted either way.
    pub async fn run<F>(&self, shutdown: F) -> Result<BuildReport, CdbuildError>
    where
        F: Future<Output = ()>,
    {
        let config = &self.config;
        let bucket = &config.staging_bucket;
        let object = &config.build_object;

        provision_bucket(self.storage.as_ref(), &config.project, bucket).await?;

        tracing::info!("Pushing code to gs://{bucket}/{object}");
        upload_source(self.storage.as_ref(), &config.source_dir, bucket, object).await?;

        let build = Build::dockerize(bucket, object, &config.image);
        let build_id = match submit_build(self.builds.as_ref(), &config.project, &build).await {
            Ok(build_id) => build_id,
            Err(err) => {
                self.cleanup_after_abort().await;
                return Err(err);
            }
        };
        tracing::info!("Logs at {}", config::logs_url(bucket, &build_id));

        let outcome = wait_for_build(
            self.builds.as_ref(),
            &config.project,
            &build_id,
            &config.poll,
            shutdown,
        )
        .await;

        match outcome {
            Ok(WaitOutcome::Finished(build)) => {
                let status = build.status();
                match build.status_detail.as_deref().filter(|detail| !detail.is_empty()) {
                    Some(detail) => tracing::info!("Build status: {status} ({detail})"),
                    None => tracing::info!("Build status: {status}"),
                }
                let cleaned_up = self.cleanup().await?;
                Ok(BuildReport {
                    build_id,
                    status,
                    staging_bucket: bucket.clone(),
                    build_object: object.clone(),
                    cleaned_up,
                })
            }
            Ok(WaitOutcome::TimedOut(waited)) => {
                self.cancel_build(&build_id).await;
                self.cleanup_after_abort().await;
                Err(CdbuildError::TimedOut { build_id, waited })
            }
            Ok(WaitOutcome::Interrupted) => {
                self.cancel_build(&build_id).await;
                self.cleanup_after_abort().await;
                Err(CdbuildError::Interrupted { build_id })
            }
            Err(err) => {
                self.cleanup_after_abort().await;
                Err(err)
            }
        }
    }

    /// Delete sources that earlier runs for this project failed to remove.
    /// Returns how many ledger entries were cleared.
    pub async fn sweep_orphans(&self) -> Result<usize, CdbuildError> {
        let ledger = self.ledger.load()?;
        let mut cleared = 0;
        for entry in ledger.for_project(&self.config.project) {
            match self.storage.delete_object(&entry.bucket, &entry.object).await {
                Ok(()) => {
                    tracing::info!("Deleted orphaned source gs://{}/{}", entry.bucket, entry.object);
                }
                Err(err) if err.is_not_found() => {
                    tracing::debug!("Orphaned source gs://{}/{} is already gone", entry.bucket, entry.object);
                }
                Err(err) => {
                    tracing::warn!(
                        "Could not delete orphaned source gs://{}/{}: {err}",
                        entry.bucket,
                        entry.object
                    );
                    continue;
                }
            }
            self.ledger.forget(&entry.bucket, &entry.object)?;
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn cleanup(&self) -> Result<bool, CdbuildError> {
        let config = &self.config;
        match delete_source(self.storage.as_ref(), &config.staging_bucket, &config.build_object).await
        {
            Ok(()) => {
                tracing::info!("Cleaned up.");
                Ok(true)
            }
            Err(err) => {
                self.remember_orphan();
                match config.cleanup {
                    CleanupPolicy::Strict => Err(err),
                    CleanupPolicy::Lenient => {
                        tracing::warn!("{err}");
                        Ok(false)
                    }
                }
            }
        }
    }

    async fn cleanup_after_abort(&self) {
        let config = &self.config;
        match delete_source(self.storage.as_ref(), &config.staging_bucket, &config.build_object).await
        {
            Ok(()) => tracing::info!("Cleaned up."),
            Err(err) => {
                tracing::warn!("{err}");
                self.remember_orphan();
            }
        }
    }

    fn remember_orphan(&self) {
        let config = &self.config;
        let entry = OrphanEntry::new(&config.project, &config.staging_bucket, &config.build_object);
        match self.ledger.record(entry) {
            Ok(()) => tracing::info!(
                "Recorded gs://{}/{} for a later --sweep-orphans",
                config.staging_bucket,
                config.build_object
            ),
            Err(err) => tracing::warn!("Could not record orphaned source: {err}"),
        }
    }

    async fn cancel_build(&self, build_id: &str) {
        match self.builds.cancel_build(&self.config.project, build_id).await {
            Ok(build) => tracing::info!("Cancelled build {build_id}: {}", build.status()),
            Err(err) => tracing::warn!("Could not cancel build {build_id}: {err}"),
        }
    }
}

/// Make sure `bucket` exists, creating it under `project` if it does not.
///
/// Losing a creation race to another invocation is not an error.
pub async fn provision_bucket(
    storage: &dyn ObjectStore,
    project: &str,
    bucket: &str,
) -> Result<(), CdbuildError> {
    match storage.get_bucket(bucket).await {
        Ok(found) => {
            tracing::debug!("Staging bucket {} exists", found.name);
            return Ok(());
        }
        Err(err) if err.is_not_found() => {}
        Err(source) => {
            return Err(CdbuildError::BucketLookup {
                bucket: bucket.to_string(),
                source,
            });
        }
    }

    tracing::info!("Creating staging bucket gs://{bucket}");
    match storage.create_bucket(project, bucket).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_conflict() => {
            tracing::debug!("Staging bucket {bucket} was created concurrently");
            Ok(())
        }
        Err(err) if err.is_permission_denied() => {
            tracing::debug!(reason = err.reason(), "Bucket creation denied: {err}");
            Err(CdbuildError::BillingDisabled {
                project: project.to_string(),
                bucket: bucket.to_string(),
            })
        }
        Err(source) => Err(CdbuildError::BucketCreate {
            bucket: bucket.to_string(),
            source,
        }),
    }
}

/// Stream a tarball of `source_dir` into `bucket/object`.
///
/// Returns the number of compressed bytes uploaded.
pub async fn upload_source(
    storage: &dyn ObjectStore,
    source_dir: &Path,
    bucket: &str,
    object: &str,
) -> Result<u64, CdbuildError> {
    let (stream, archiver) = archive_stream(source_dir);
    upload_archive(storage, source_dir, stream, archiver, bucket, object).await
}

/// Upload an archive produced by a running archiver.
///
/// An archiver error wins over the upload error it caused, and an object
/// that was committed from a failed archive is deleted again.
pub async fn upload_archive(
    storage: &dyn ObjectStore,
    source_dir: &Path,
    stream: ArchiveStream,
    archiver: JoinHandle<io::Result<u64>>,
    bucket: &str,
    object: &str,
) -> Result<u64, CdbuildError> {
    let progress = upload_progress(object);
    let counter = progress.clone();
    let stream = stream.inspect_ok(move |chunk| counter.inc(chunk.len() as u64));
    let uploaded = storage
        .upload_stream(bucket, object, Box::pin(stream))
        .await;
    progress.finish_and_clear();

    let archived = archiver.await.map_err(io::Error::other).and_then(|res| res);

    match (uploaded, archived) {
        (Ok(meta), Ok(bytes)) => {
            tracing::debug!("Uploaded {bytes} bytes to gs://{}/{}", meta.bucket, meta.name);
            Ok(bytes)
        }
        (Ok(_), Err(err)) => {
            // an incomplete archive must not stay behind as a valid object
            if let Err(delete_err) = storage.delete_object(bucket, object).await {
                tracing::warn!("Could not remove partial upload gs://{bucket}/{object}: {delete_err}");
            }
            Err(archive_error(source_dir, err))
        }
        (Err(_), Err(err)) if err.kind() != io::ErrorKind::BrokenPipe => {
            Err(archive_error(source_dir, err))
        }
        (Err(source), _) => Err(CdbuildError::Upload {
            bucket: bucket.to_string(),
            object: object.to_string(),
            source,
        }),
    }
}

fn archive_error(source_dir: &Path, source: io::Error) -> CdbuildError {
    CdbuildError::Archive {
        root: source_dir.to_path_buf(),
        source,
    }
}

fn upload_progress(object: &str) -> ProgressBar {
    let progress_bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg} {bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    progress_bar.set_style(style);
    progress_bar.set_message(format!("Uploading {object}"));
    progress_bar.enable_steady_tick(Duration::from_millis(120));
    progress_bar
}

/// Submit `build` and return the remote build ID.
pub async fn submit_build(
    builds: &dyn BuildService,
    project: &str,
    build: &Build,
) -> Result<String, CdbuildError> {
    let operation = builds.create_build(project, build).await.map_err(|err| {
        if err.is_not_found() || err.is_permission_denied() {
            tracing::debug!(reason = err.reason(), "Build submission rejected: {err}");
            CdbuildError::BuildApiDisabled {
                project: project.to_string(),
            }
        } else {
            CdbuildError::Submit(err)
        }
    })?;

    operation
        .build_id()
        .map(str::to_string)
        .ok_or_else(|| {
            CdbuildError::MissingBuildId(
                operation
                    .name
                    .clone()
                    .unwrap_or_else(|| "operation has no build metadata".to_string()),
            )
        })
}

/// Poll the build until it reaches a terminal status.
///
/// Sleeps between polls follow `policy`. The deadline also cuts short a
/// status fetch that hangs. A status-fetch error ends the wait immediately;
/// it is not retried.
pub async fn wait_for_build<F>(
    builds: &dyn BuildService,
    project: &str,
    build_id: &str,
    policy: &PollPolicy,
    shutdown: F,
) -> Result<WaitOutcome, CdbuildError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let started = Instant::now();
    let deadline = policy.timeout.map(|timeout| started + timeout);
    let mut intervals = policy.intervals();

    loop {
        let build = tokio::select! {
            _ = &mut shutdown => return Ok(WaitOutcome::Interrupted),
            _ = until_deadline(deadline) => {
                return Ok(WaitOutcome::TimedOut(started.elapsed()));
            }
            build = builds.get_build(project, build_id) => build.map_err(|source| {
                CdbuildError::StatusFetch {
                    build_id: build_id.to_string(),
                    source,
                }
            })?,
        };

        let status = build.status();
        if status.is_terminal() {
            return Ok(WaitOutcome::Finished(build));
        }
        tracing::debug!("Build {build_id} is {status}");

        let mut delay = intervals.next().unwrap_or(policy.max_interval);
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut(now - started));
            }
            delay = delay.min(deadline - now);
        }

        tokio::select! {
            _ = &mut shutdown => return Ok(WaitOutcome::Interrupted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Delete the uploaded source archive.
pub async fn delete_source(
    storage: &dyn ObjectStore,
    bucket: &str,
    object: &str,
) -> Result<(), CdbuildError> {
    storage
        .delete_object(bucket, object)
        .await
        .map_err(|source| CdbuildError::Cleanup {
            bucket: bucket.to_string(),
            object: object.to_string(),
            source,
        })
}
