//! Concurrent upload of file batches with per-item failure isolation.
//!
//! Items are driven through `buffer_unordered`, so completions arrive in
//! any order relative to submission. Results are keyed by submission index
//! or pending id; callers correlate by key, never by position.
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::backend::UploadTransport;
use crate::container::TargetContainer;
use crate::error::UploadError;
use crate::model::{
    PendingId, PendingUpload, SourceFile, UploadBatchResult, UploadFailure, UploadStatus,
    UploadSuccess,
};
use crate::registry::UploadPolicy;

pub type UploadResult = Result<String, UploadError>;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct BatchUploadOrchestrator {
    transport: Arc<dyn UploadTransport>,
    max_concurrency: usize,
    policy: Option<UploadPolicy>,
}

impl BatchUploadOrchestrator {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self {
            transport,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            policy: None,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Check raw files against `policy` before submitting them. Rejected
    /// files are reported as `UploadError::Validation` without a network call.
    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// One transport round trip for one file.
    pub async fn upload_single(&self, file: &SourceFile, container: &TargetContainer) -> UploadResult {
        if let Some(policy) = &self.policy {
            policy.validate(file)?;
        }
        self.transport.upload(file, container).await
    }

    /// Upload `files` concurrently into `container`. Individual failures are
    /// recorded in the result; only an invalid container fails the call.
    /// `on_progress(completed, total)` fires as each item finishes.
    #[instrument(skip_all, fields(total = files.len(), container = %container))]
    pub async fn upload_batch<F>(
        &self,
        files: &[SourceFile],
        container: &str,
        mut on_progress: F,
    ) -> Result<UploadBatchResult<usize>, UploadError>
    where
        F: FnMut(usize, usize),
    {
        let container = TargetContainer::parse(container)?;
        let total = files.len();
        let mut result = UploadBatchResult::default();
        let container = &container;

        let mut completions = stream::iter(files.iter().enumerate())
            .map(|(index, file)| async move { (index, self.upload_single(file, container).await) })
            .buffer_unordered(self.max_concurrency);

        let mut completed = 0;
        while let Some((index, outcome)) = completions.next().await {
            completed += 1;
            record(&mut result, index, outcome);
            on_progress(completed, total);
        }

        info!(
            succeeded = result.successful.len(),
            failed = result.failed.len(),
            "upload batch finished"
        );
        Ok(result)
    }

    /// Upload every not-yet-succeeded pending upload, updating `status`,
    /// `progress`, `error` and `remote_url` in place. `on_complete` fires
    /// once per submitted item, in completion order. Items stored by an
    /// earlier, possibly interrupted call are not resubmitted but are
    /// reported in `successful` again with their stored URL.
    #[instrument(skip_all, fields(total = pending.len()))]
    pub async fn process_pending_uploads<P, C>(
        &self,
        pending: &mut [PendingUpload],
        mut on_progress: P,
        mut on_complete: C,
    ) -> UploadBatchResult<PendingId>
    where
        P: FnMut(usize, usize),
        C: FnMut(&PendingId, &UploadResult),
    {
        let mut result = UploadBatchResult::default();
        let mut jobs = Vec::new();
        for (index, upload) in pending.iter_mut().enumerate() {
            if let (UploadStatus::Succeeded, Some(url)) = (upload.status, &upload.remote_url) {
                result.successful.push(UploadSuccess {
                    key: upload.id,
                    url: url.clone(),
                });
                continue;
            }
            upload.status = UploadStatus::Uploading;
            upload.progress = 0;
            upload.error = None;
            jobs.push((index, upload.id, upload.source.clone(), upload.container.clone()));
        }

        let total = jobs.len();
        let transport = self.transport.clone();

        let mut completions = stream::iter(jobs)
            .map(|(index, id, source, container)| {
                let transport = transport.clone();
                async move {
                    let outcome = transport.upload(&source, &container).await;
                    (index, id, outcome)
                }
            })
            .buffer_unordered(self.max_concurrency);

        let mut completed = 0;
        while let Some((index, id, outcome)) = completions.next().await {
            completed += 1;
            let upload = &mut pending[index];
            match &outcome {
                Ok(url) => {
                    upload.status = UploadStatus::Succeeded;
                    upload.progress = 100;
                    upload.remote_url = Some(url.clone());
                    info!(%id, %url, "pending upload stored");
                }
                Err(err) => {
                    upload.status = UploadStatus::Failed;
                    upload.error = Some(err.clone());
                    warn!(%id, name = %upload.source.name, %err, "pending upload failed");
                }
            }
            on_complete(&id, &outcome);
            on_progress(completed, total);
            record(&mut result, id, outcome);
        }
        result
    }
}

fn record<K>(result: &mut UploadBatchResult<K>, key: K, outcome: UploadResult) {
    match outcome {
        Ok(url) => result.successful.push(UploadSuccess { key, url }),
        Err(error) => result.failed.push(UploadFailure { key, error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Fails files whose name starts with `fail`; sleeps `delay_ms` taken
    /// from the first byte.
    #[derive(Default)]
    struct ScriptedTransport {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UploadTransport for ScriptedTransport {
        async fn upload(&self, file: &SourceFile, container: &TargetContainer) -> UploadResult {
            self.calls.lock().await.push(file.name.clone());
            let delay = file.bytes.first().copied().unwrap_or(0) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if file.name.starts_with("fail") {
                return Err(UploadError::transport("connection reset"));
            }
            Ok(format!("https://cdn.example.com/{}/{}", container, file.name))
        }
    }

    fn file(name: &str, delay_ms: u8) -> SourceFile {
        SourceFile::new(name, "image/png", vec![delay_ms, 1, 2])
    }

    #[tokio::test]
    async fn batch_accounts_for_every_file() {
        let transport = Arc::new(ScriptedTransport::default());
        let orchestrator = BatchUploadOrchestrator::new(transport.clone());
        let files = vec![file("a.png", 30), file("fail.png", 5), file("c.png", 1)];
        let mut progress = Vec::new();

        let result = orchestrator
            .upload_batch(&files, "dishes/1", |done, total| progress.push((done, total)))
            .await
            .unwrap();

        assert_eq!(result.successful.len() + result.failed.len(), files.len());
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].key, 1);
        assert!(!result.failed[0].error.to_string().is_empty());
        let keys: HashSet<usize> = result.successful.iter().map(|s| s.key).collect();
        assert_eq!(keys, HashSet::from([0, 2]));
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(transport.calls.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn invalid_container_fails_the_batch() {
        let orchestrator = BatchUploadOrchestrator::new(Arc::new(ScriptedTransport::default()));
        let err = orchestrator
            .upload_batch(&[file("a.png", 0)], "../etc", |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidContainer { .. }));
    }

    #[tokio::test]
    async fn policy_violations_fail_before_the_network() {
        let transport = Arc::new(ScriptedTransport::default());
        let orchestrator = BatchUploadOrchestrator::new(transport.clone()).with_policy(UploadPolicy {
            max_file_bytes: 3,
            allowed_mime_types: vec!["image/png".into()],
        });
        let big = SourceFile::new("big.png", "image/png", vec![0u8; 8]);
        let result = orchestrator
            .upload_batch(&[big, file("ok.png", 0)], "dishes/1", |_, _| {})
            .await
            .unwrap();
        assert_eq!(result.successful.len(), 1);
        assert!(matches!(result.failed[0].error, UploadError::Validation(_)));
        assert_eq!(*transport.calls.lock().await, vec!["ok.png".to_string()]);
    }

    #[tokio::test]
    async fn empty_batch_is_empty_result() {
        let orchestrator = BatchUploadOrchestrator::new(Arc::new(ScriptedTransport::default()));
        let mut calls = 0;
        let result = orchestrator
            .upload_batch(&[], "dishes/1", |_, _| calls += 1)
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn concurrency_is_at_least_one() {
        let orchestrator =
            BatchUploadOrchestrator::new(Arc::new(ScriptedTransport::default())).with_max_concurrency(0);
        assert_eq!(orchestrator.max_concurrency(), 1);
    }
}
