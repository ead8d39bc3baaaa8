//! Upload session: stage grant lifecycle plus bounded-concurrency PUTs.
//!
//! ## Upload Flow
//!
//! 1. Apply for a stage grant (credential, key prefix, quota)
//! 2. Check the batch against the quota, failing before any PUT
//! 3. PUT each file under `<key prefix>/<path relative to upload root>`
//! 4. On failure, wait `retry_delay`, re-apply, and try again until
//!    `max_attempts` is spent
//!
//! The active grant is shared by all in-flight PUTs. Refreshes are serialized
//! by an async mutex and tagged with a version so that PUTs failing against
//! the same grant trigger a single re-apply.

use super::api::ApplyStageRequest;
use super::credential::StageGrant;
use super::stage_client::{HttpStageClient, StageClient};
use super::store::{ObjectPut, ObjectStoreConnector, S3Connector};
use crate::config::RemoteConfig;
use crate::error::UploadError;
use crate::metrics::BulkWriterMetrics;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default number of concurrent PUTs.
pub const DEFAULT_CONCURRENCY: usize = 10;
/// Default attempts per file.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Upload tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    /// Stage to upload into
    pub stage_name: String,
    /// Maximum concurrent PUTs
    pub concurrency: usize,
    /// Attempts per file, including the first
    pub max_attempts: u32,
    /// Fixed delay before each retry
    pub retry_delay: Duration,
}

impl UploadOptions {
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// A file that reached the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub local_path: PathBuf,
    pub key: String,
    pub bytes: u64,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// A file that failed terminally.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedUpload {
    pub local_path: PathBuf,
    /// Last key attempted, if a grant was ever obtained
    pub key: Option<String>,
    pub attempts: u32,
    pub error: UploadError,
}

/// Outcome of [`UploadSession::upload_all`].
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub stage_name: String,
    /// Target path the grant was applied for
    pub remote_path: String,
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<FailedUpload>,
    /// Bytes successfully uploaded
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl UploadResult {
    /// Whether every file was uploaded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// First failure as an error.
    pub fn into_error(self) -> Option<UploadError> {
        self.failed.into_iter().next().map(|f| match f.error {
            UploadError::Exhausted { .. } => f.error,
            error => UploadError::Exhausted {
                key: f.key.unwrap_or_else(|| f.local_path.display().to_string()),
                attempts: f.attempts,
                message: error.to_string(),
            },
        })
    }
}

/// Grant currently in use, tagged with a refresh version.
struct ActiveGrant {
    version: u64,
    grant: StageGrant,
    store: Arc<dyn ObjectPut>,
}

/// Uploads files to a stage with refresh-on-expiry and retries.
pub struct UploadSession {
    client: Arc<dyn StageClient>,
    connector: Arc<dyn ObjectStoreConnector>,
    options: UploadOptions,
    active: RwLock<Option<Arc<ActiveGrant>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    versions: AtomicU64,
    metrics: Arc<BulkWriterMetrics>,
}

impl UploadSession {
    pub fn new(
        client: Arc<dyn StageClient>,
        connector: Arc<dyn ObjectStoreConnector>,
        options: UploadOptions,
    ) -> Self {
        Self {
            client,
            connector,
            options,
            active: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            versions: AtomicU64::new(0),
            metrics: Arc::new(BulkWriterMetrics::new()),
        }
    }

    /// Build an HTTP + S3 session from configuration.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, UploadError> {
        let client = HttpStageClient::new(
            &config.endpoint,
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )?;
        let options = UploadOptions::new(config.stage_name.clone())
            .with_concurrency(config.concurrency)
            .with_max_attempts(config.max_attempts)
            .with_retry_delay(Duration::from_millis(config.retry_delay_ms));
        Ok(Self::new(Arc::new(client), Arc::new(S3Connector), options))
    }

    /// Share a metrics instance with the rest of the writer.
    pub fn with_metrics(mut self, metrics: Arc<BulkWriterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<BulkWriterMetrics> {
        &self.metrics
    }

    /// Grant currently in use, if any.
    pub fn current_grant(&self) -> Option<StageGrant> {
        self.active_grant().map(|a| a.grant.clone())
    }

    /// Upload `local_paths` to the stage.
    ///
    /// Keys are the grant's key prefix joined with each path relative to
    /// `upload_root`. Fails without uploading anything if the batch exceeds
    /// the stage quota; otherwise per-file failures are listed in the result.
    pub async fn upload_all(
        &self,
        local_paths: &[PathBuf],
        upload_root: &Path,
        target_prefix: &str,
    ) -> Result<UploadResult, UploadError> {
        let started = Instant::now();

        let mut total_bytes = 0u64;
        for path in local_paths {
            let metadata = tokio::fs::metadata(path)
                .await
                .map_err(|e| UploadError::LocalFile {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            total_bytes += metadata.len();
        }

        if local_paths.is_empty() {
            return Ok(UploadResult {
                stage_name: self.options.stage_name.clone(),
                remote_path: target_prefix.to_string(),
                uploaded: Vec::new(),
                failed: Vec::new(),
                total_bytes: 0,
                elapsed: started.elapsed(),
            });
        }

        let active = {
            let _guard = self.refresh_lock.lock().await;
            self.apply_locked(target_prefix, false).await?
        };
        active
            .grant
            .constraint
            .check(total_bytes, local_paths.len() as u64)?;

        info!(
            stage = %self.options.stage_name,
            files = local_paths.len(),
            bytes = total_bytes,
            concurrency = self.options.concurrency,
            "Starting stage upload"
        );

        let outcomes: Vec<Result<UploadedFile, FailedUpload>> = stream::iter(local_paths)
            .map(|path| self.upload_one(path, upload_root, target_prefix))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut uploaded = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(file) => uploaded.push(file),
                Err(failure) => failed.push(failure),
            }
        }

        let result = UploadResult {
            stage_name: self.options.stage_name.clone(),
            remote_path: target_prefix.to_string(),
            total_bytes: uploaded.iter().map(|f| f.bytes).sum(),
            uploaded,
            failed,
            elapsed: started.elapsed(),
        };

        info!(
            stage = %result.stage_name,
            uploaded = result.uploaded.len(),
            failed = result.failed.len(),
            bytes = result.total_bytes,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Stage upload finished"
        );

        Ok(result)
    }

    async fn upload_one(
        &self,
        path: &Path,
        upload_root: &Path,
        target_prefix: &str,
    ) -> Result<UploadedFile, FailedUpload> {
        let relative = relative_key(path, upload_root).map_err(|error| FailedUpload {
            local_path: path.to_path_buf(),
            key: None,
            attempts: 0,
            error,
        })?;

        let max_attempts = self.options.max_attempts.max(1);
        let mut stale_version = None;
        let mut last_key = None;
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            if attempts > 1 {
                self.metrics.record_upload_retry();
                tokio::time::sleep(self.options.retry_delay).await;
            }

            let grant = match stale_version {
                None => self.current_fresh(target_prefix).await,
                Some(version) => self.refresh_after_failure(target_prefix, version).await,
            };
            let active = match grant {
                Ok(active) => active,
                Err(e) => {
                    warn!(path = %path.display(), attempt = attempts, error = %e, "Stage apply failed");
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if retryable {
                        continue;
                    }
                    break;
                }
            };
            stale_version = Some(active.version);

            let key = active.grant.object_key(&relative);
            match active.store.put_file(&key, path).await {
                Ok(bytes) => {
                    self.metrics.record_file_uploaded(bytes);
                    debug!(key = %key, bytes, attempts, "File uploaded");
                    return Ok(UploadedFile {
                        local_path: path.to_path_buf(),
                        key,
                        bytes,
                        attempts,
                    });
                }
                Err(e) => {
                    warn!(key = %key, attempt = attempts, max_attempts, error = %e, "Upload attempt failed");
                    let retryable = e.is_retryable();
                    last_key = Some(key);
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        self.metrics.record_upload_failure();
        let message = last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        let error = match last_error {
            Some(e) if !e.is_retryable() => e,
            _ => UploadError::Exhausted {
                key: last_key
                    .clone()
                    .unwrap_or_else(|| path.display().to_string()),
                attempts,
                message,
            },
        };

        Err(FailedUpload {
            local_path: path.to_path_buf(),
            key: last_key,
            attempts,
            error,
        })
    }

    fn active_grant(&self) -> Option<Arc<ActiveGrant>> {
        self.active.read().clone()
    }

    /// Current grant, refreshed first if its credential has expired.
    async fn current_fresh(&self, target_prefix: &str) -> Result<Arc<ActiveGrant>, UploadError> {
        if let Some(active) = self.active_grant() {
            if !active.grant.credential.is_expired() {
                return Ok(active);
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // Another task may have refreshed while we waited.
        if let Some(active) = self.active_grant() {
            if !active.grant.credential.is_expired() {
                return Ok(active);
            }
        }
        debug!(stage = %self.options.stage_name, "Credential expired, refreshing");
        self.apply_locked(target_prefix, true).await
    }

    /// Refresh after a failed PUT against grant `stale_version`.
    async fn refresh_after_failure(
        &self,
        target_prefix: &str,
        stale_version: u64,
    ) -> Result<Arc<ActiveGrant>, UploadError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(active) = self.active_grant() {
            if active.version != stale_version && !active.grant.credential.is_expired() {
                return Ok(active);
            }
        }
        self.apply_locked(target_prefix, true).await
    }

    /// Apply and install a new grant. Callers hold `refresh_lock`.
    async fn apply_locked(
        &self,
        target_prefix: &str,
        refresh: bool,
    ) -> Result<Arc<ActiveGrant>, UploadError> {
        let request = ApplyStageRequest {
            stage_name: self.options.stage_name.clone(),
            path: target_prefix.to_string(),
        };
        let grant = self.client.apply(&request).await?;
        self.metrics.record_stage_apply(refresh);

        let store = self.connector.connect(&grant)?;
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            stage = %grant.stage_name,
            bucket = %grant.credential.bucket,
            key_prefix = %grant.credential.key_prefix,
            expires_at = %grant.credential.expires_at,
            version,
            refresh,
            "Stage grant installed"
        );

        let active = Arc::new(ActiveGrant {
            version,
            grant,
            store,
        });
        *self.active.write() = Some(Arc::clone(&active));
        Ok(active)
    }
}

/// `path` relative to `root`, joined with '/'.
fn relative_key(path: &Path, root: &Path) -> Result<String, UploadError> {
    let relative = path.strip_prefix(root).map_err(|_| UploadError::LocalFile {
        path: path.display().to_string(),
        message: format!("not under upload root {}", root.display()),
    })?;

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        return Err(UploadError::LocalFile {
            path: path.display().to_string(),
            message: "path is the upload root".into(),
        });
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::credential::{UploadConstraint, UploadCredential};
    use crate::upload::store::StaticStoreConnector;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use object_store::memory::InMemory;
    use object_store::ObjectStore;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Stage client handing out grants from a script of expiry offsets.
    struct MockStageClient {
        applies: AtomicUsize,
        /// Expiry offset in seconds per call; the last entry repeats
        expiries: Vec<i64>,
        max_content_length: u64,
        max_file_count: Option<u64>,
        fail_first: usize,
    }

    impl MockStageClient {
        fn new() -> Self {
            Self {
                applies: AtomicUsize::new(0),
                expiries: vec![3600],
                max_content_length: 1 << 30,
                max_file_count: None,
                fail_first: 0,
            }
        }

        fn applies(&self) -> usize {
            self.applies.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageClient for MockStageClient {
        async fn apply(&self, request: &ApplyStageRequest) -> Result<StageGrant, UploadError> {
            let call = self.applies.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(UploadError::Apply("unavailable".into()));
            }
            let offset = self.expiries[call.min(self.expiries.len() - 1)];
            Ok(StageGrant {
                stage_name: request.stage_name.clone(),
                credential: UploadCredential {
                    access_key: format!("ak-{}", call),
                    secret_key: "sk".into(),
                    session_token: "token".into(),
                    expires_at: Utc::now() + ChronoDuration::seconds(offset),
                    bucket: "bucket".into(),
                    key_prefix: format!("stages/{}/{}", request.stage_name, request.path),
                },
                constraint: UploadConstraint {
                    max_content_length: self.max_content_length,
                    max_file_count: self.max_file_count,
                },
                endpoint: "localhost".into(),
                region: None,
            })
        }
    }

    /// PUT target that fails a fixed number of times and tracks concurrency.
    #[derive(Default)]
    struct FlakyStore {
        puts: AtomicUsize,
        failures_left: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay_ms: u64,
        keys: parking_lot::Mutex<Vec<String>>,
        /// Access key of the grant each PUT ran under
        access_keys: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectPut for FlakyStore {
        async fn put_file(&self, key: &str, path: &Path) -> Result<u64, UploadError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(UploadError::Transient {
                    key: key.to_string(),
                    message: "connection reset".into(),
                });
            }
            self.keys.lock().push(key.to_string());
            Ok(std::fs::metadata(path).map(|m| m.len()).unwrap_or(0))
        }
    }

    struct FixedConnector(Arc<FlakyStore>);

    impl ObjectStoreConnector for FixedConnector {
        fn connect(&self, grant: &StageGrant) -> Result<Arc<dyn ObjectPut>, UploadError> {
            Ok(Arc::new(GrantTagged {
                access_key: grant.credential.access_key.clone(),
                store: Arc::clone(&self.0),
            }))
        }
    }

    /// PUT target bound to one grant's credential.
    struct GrantTagged {
        access_key: String,
        store: Arc<FlakyStore>,
    }

    #[async_trait]
    impl ObjectPut for GrantTagged {
        async fn put_file(&self, key: &str, path: &Path) -> Result<u64, UploadError> {
            self.store.access_keys.lock().push(self.access_key.clone());
            self.store.put_file(key, path).await
        }
    }

    fn write_files(dir: &Path, count: usize) -> Vec<PathBuf> {
        let sub = dir.join("run");
        std::fs::create_dir_all(&sub).unwrap();
        (1..=count)
            .map(|i| {
                let path = sub.join(format!("{}.json", i));
                std::fs::write(&path, vec![b'x'; 10]).unwrap();
                path
            })
            .collect()
    }

    fn options() -> UploadOptions {
        UploadOptions::new("stage-a").with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_uploads_into_memory_store() {
        let dir = TempDir::new().unwrap();
        let files = write_files(dir.path(), 3);
        let client = Arc::new(MockStageClient::new());
        let memory = Arc::new(InMemory::new());
        let session = UploadSession::new(
            client.clone(),
            Arc::new(StaticStoreConnector::new(memory.clone())),
            options(),
        );

        let result = session.upload_all(&files, dir.path(), "batch-1/").await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.stage_name, "stage-a");
        assert_eq!(result.remote_path, "batch-1/");
        assert_eq!(result.total_bytes, 30);
        assert_eq!(result.uploaded[0].key, "stages/stage-a/batch-1/run/1.json");
        assert_eq!(client.applies(), 1);

        let stored = memory
            .get(&object_store::path::Path::from("stages/stage-a/batch-1/run/3.json"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(stored.len(), 10);

        assert_eq!(session.metrics().files_uploaded_total(), 3);
        assert_eq!(session.metrics().bytes_uploaded_total(), 30);
    }

    #[tokio::test]
    async fn test_quota_exceeded_before_any_put() {
        let dir = TempDir::new().unwrap();
        let files = write_files(dir.path(), 3);
        let store = Arc::new(FlakyStore::default());

        let mut client = MockStageClient::new();
        client.max_content_length = 25;
        let session = UploadSession::new(
            Arc::new(client),
            Arc::new(FixedConnector(store.clone())),
            options(),
        );
        let err = session.upload_all(&files, dir.path(), "p").await.unwrap_err();
        assert_eq!(err, UploadError::ContentLengthExceeded { total: 30, max: 25 });
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);

        let mut client = MockStageClient::new();
        client.max_file_count = Some(2);
        let session = UploadSession::new(
            Arc::new(client),
            Arc::new(FixedConnector(store.clone())),
            options(),
        );
        let err = session.upload_all(&files, dir.path(), "p").await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_budget_with_refresh_per_attempt() {
        let dir = TempDir::new().unwrap();
        let files = write_files(dir.path(), 1);
        let store = Arc::new(FlakyStore {
            failures_left: AtomicUsize::new(usize::MAX),
            ..Default::default()
        });
        let client = Arc::new(MockStageClient::new());
        let session = UploadSession::new(
            client.clone(),
            Arc::new(FixedConnector(store.clone())),
            options().with_max_attempts(4),
        );

        let result = session.upload_all(&files, dir.path(), "p").await.unwrap();
        assert!(!result.is_complete());
        assert_eq!(store.puts.load(Ordering::SeqCst), 4);
        // One apply before each attempt.
        assert_eq!(client.applies(), 4);

        let failure = &result.failed[0];
        assert_eq!(failure.attempts, 4);
        assert!(matches!(failure.error, UploadError::Exhausted { attempts: 4, .. }));
        assert_eq!(session.metrics().upload_retries_total(), 3);
        assert_eq!(session.metrics().upload_failures_total(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let dir = TempDir::new().unwrap();
        let files = write_files(dir.path(), 1);
        let store = Arc::new(FlakyStore {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let client = Arc::new(MockStageClient::new());
        let session = UploadSession::new(
            client.clone(),
            Arc::new(FixedConnector(store.clone())),
            options(),
        );

        let result = session.upload_all(&files, dir.path(), "p").await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.uploaded[0].attempts, 2);
        assert_eq!(client.applies(), 2);
    }

    #[tokio::test]
    async fn test_expired_credential_refreshed_once() {
        let dir = TempDir::new().unwrap();
        let files = write_files(dir.path(), 8);
        let store = Arc::new(FlakyStore {
            delay_ms: 5,
            ..Default::default()
        });
        let mut client = MockStageClient::new();
        // First grant is already expired, the second is good for an hour.
        client.expiries = vec![-60, 3600];
        let client = Arc::new(client);
        let session = UploadSession::new(
            client.clone(),
            Arc::new(FixedConnector(store.clone())),
            options().with_concurrency(4),
        );

        let result = session.upload_all(&files, dir.path(), "p").await.unwrap();
        assert!(result.is_complete());
        assert_eq!(client.applies(), 2);
        assert_eq!(session.metrics().credential_refreshes_total(), 1);
        assert_eq!(session.current_grant().unwrap().credential.access_key, "ak-1");

        let used = store.access_keys.lock().clone();
        assert_eq!(used.len(), 8);
        assert!(used.iter().all(|k| k == "ak-1"), "PUTs ran under {:?}", used);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = TempDir::new().unwrap();
        let files = write_files(dir.path(), 12);
        let store = Arc::new(FlakyStore {
            delay_ms: 20,
            ..Default::default()
        });
        let session = UploadSession::new(
            Arc::new(MockStageClient::new()),
            Arc::new(FixedConnector(store.clone())),
            options().with_concurrency(3),
        );

        let result = session.upload_all(&files, dir.path(), "p").await.unwrap();
        assert_eq!(result.uploaded.len(), 12);
        let max = store.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "max in flight {}", max);
        assert!(max >= 2);
        // Results keep input order.
        assert!(result.uploaded[0].key.ends_with("run/1.json"));
        assert!(result.uploaded[11].key.ends_with("run/12.json"));
    }

    #[tokio::test]
    async fn test_apply_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let files = write_files(dir.path(), 1);
        let store = Arc::new(FlakyStore::default());
        let mut client = MockStageClient::new();
        client.fail_first = 1;
        let session = UploadSession::new(
            Arc::new(client),
            Arc::new(FixedConnector(store)),
            options(),
        );

        // The initial apply is not retried.
        let err = session.upload_all(&files, dir.path(), "p").await.unwrap_err();
        assert!(matches!(err, UploadError::Apply(_)));

        // The next batch succeeds.
        let result = session.upload_all(&files, dir.path(), "p").await.unwrap();
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn test_file_outside_root_fails_without_retry() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let files = write_files(other.path(), 1);
        let store = Arc::new(FlakyStore::default());
        let session = UploadSession::new(
            Arc::new(MockStageClient::new()),
            Arc::new(FixedConnector(store.clone())),
            options(),
        );

        let result = session.upload_all(&files, dir.path(), "p").await.unwrap();
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].attempts, 0);
        assert!(matches!(result.failed[0].error, UploadError::LocalFile { .. }));
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_apply() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockStageClient::new());
        let session = UploadSession::new(
            client.clone(),
            Arc::new(StaticStoreConnector::new(Arc::new(InMemory::new()))),
            options(),
        );
        let result = session.upload_all(&[], dir.path(), "p").await.unwrap();
        assert!(result.is_complete());
        assert_eq!(client.applies(), 0);
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/tmp/root");
        assert_eq!(
            relative_key(Path::new("/tmp/root/abc/1.json"), root).unwrap(),
            "abc/1.json"
        );
        assert!(relative_key(Path::new("/elsewhere/1.json"), root).is_err());
        assert!(relative_key(root, root).is_err());
    }
}
