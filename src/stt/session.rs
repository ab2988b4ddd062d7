// src/stt/session.rs
// Upload/poll state machine for one transcription task

use super::{RaasrApi, RetryPolicy, SigningContext, SliceIdGenerator, SttError, TranscriptSegment};
use crate::config::{Credentials, SessionOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;

/// Upload slice bound. The declared slice count is `ceil(file_len / SLICE_SIZE)`.
pub const SLICE_SIZE: usize = 10 * 1024 * 1024;

/// Progress status code meaning the transcript is ready.
pub const STATUS_COMPLETE: i64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Prepared,
    Uploading,
    Merged,
    Polling,
    Completed,
    Failed,
}

/// Drives one file through the remote workflow: prepare, upload every slice
/// in file order, merge, poll until the service reports completion, fetch
/// the transcript. Any unrecoverable error moves the session to `Failed`
/// and stays there; partial uploads are never resumed.
///
/// A session serves one file for one caller. It is not meant to be shared
/// across concurrent workflows; slice ids and task state are session-owned.
pub struct TranscriptionSession {
    api: Box<dyn RaasrApi>,
    credentials: Credentials,
    options: SessionOptions,
    retry: RetryPolicy,
    state: SessionState,
    task_id: Option<String>,
    slice_ids: SliceIdGenerator,
    file_path: Option<PathBuf>,
    declared_slices: u32,
    uploaded_slices: u32,
    cancel: Option<Arc<AtomicBool>>,
}

impl TranscriptionSession {
    pub fn new(api: Box<dyn RaasrApi>, credentials: Credentials, options: SessionOptions) -> Self {
        let retry = RetryPolicy::new(options.max_retries);
        Self {
            api,
            credentials,
            options,
            retry,
            state: SessionState::Created,
            task_id: None,
            slice_ids: SliceIdGenerator::new(),
            file_path: None,
            declared_slices: 0,
            uploaded_slices: 0,
            cancel: None,
        }
    }

    /// Attach a cancellation flag. It is checked before every remote call
    /// and at every polling wake-up; once set, the session aborts to
    /// `Failed`. There is no remote-side cancel in this protocol, so
    /// abandonment is all cancellation can mean.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Declare the file to the service and store the returned task id.
    pub async fn prepare(&mut self, path: &Path) -> Result<(), SttError> {
        self.require_state(SessionState::Created)?;
        self.ensure_not_cancelled()?;

        let meta = match fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) => return Err(self.fail(SttError::Io(e))),
        };
        let file_len = meta.len();
        if file_len == 0 {
            return Err(self.fail(SttError::InvalidInput(format!(
                "{} is empty",
                path.display()
            ))));
        }

        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                return Err(self.fail(SttError::InvalidInput(format!(
                    "{} has no usable file name",
                    path.display()
                ))))
            }
        };

        let slice_num = slice_count(file_len);

        let api = self.api.as_ref();
        let credentials = &self.credentials;
        let result = send_with_retry(&self.retry, self.cancel.as_deref(), || {
            let file_name = file_name.clone();
            async move {
                let ctx = SigningContext::new(credentials)?;
                api.prepare(&ctx, file_len, &file_name, slice_num).await
            }
        })
        .await;

        let task_id = result.map_err(|e| self.fail(e))?;
        tracing::info!("Task created: {} ({} slices declared)", task_id, slice_num);

        self.task_id = Some(task_id);
        self.file_path = Some(path.to_path_buf());
        self.declared_slices = slice_num;
        self.state = SessionState::Prepared;
        Ok(())
    }

    /// Read the prepared file in 10 MiB slices and upload them one at a
    /// time, in file order. The merge step reassembles by slice sequence,
    /// so no concurrent or reordered delivery is attempted. A failed slice
    /// aborts the remaining ones.
    pub async fn upload_all(&mut self) -> Result<(), SttError> {
        self.require_state(SessionState::Prepared)?;
        self.state = SessionState::Uploading;

        let path = match self.file_path.clone() {
            Some(path) => path,
            None => {
                return Err(self.fail(SttError::Protocol(
                    "session has no prepared file".to_string(),
                )))
            }
        };
        let task_id = match self.task_id.clone() {
            Some(id) => id,
            None => {
                return Err(self.fail(SttError::Protocol(
                    "session has no task id".to_string(),
                )))
            }
        };

        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => return Err(self.fail(SttError::Io(e))),
        };

        let mut uploaded = 0u32;
        loop {
            let mut chunk = vec![0u8; SLICE_SIZE];
            let mut filled = 0usize;
            while filled < SLICE_SIZE {
                let read = match file.read(&mut chunk[filled..]).await {
                    Ok(n) => n,
                    Err(e) => return Err(self.fail(SttError::Io(e))),
                };
                if read == 0 {
                    break;
                }
                filled += read;
            }
            if filled == 0 {
                break;
            }
            chunk.truncate(filled);

            self.ensure_not_cancelled()?;
            let slice_id = self.slice_ids.next_id();

            let api = self.api.as_ref();
            let credentials = &self.credentials;
            let result = send_with_retry(&self.retry, self.cancel.as_deref(), || {
                let task_id = task_id.clone();
                let slice_id = slice_id.clone();
                let bytes = chunk.clone();
                async move {
                    let ctx = SigningContext::new(credentials)?;
                    api.upload(&ctx, &task_id, &slice_id, bytes).await
                }
            })
            .await;

            if let Err(e) = result {
                return Err(self.fail(e));
            }

            uploaded += 1;
            tracing::info!(
                "Uploaded slice {}/{} ({})",
                uploaded,
                self.declared_slices,
                slice_id
            );
        }

        if uploaded != self.declared_slices {
            return Err(self.fail(SttError::InvalidInput(format!(
                "file yielded {} slices but {} were declared; \
                 it changed between prepare and upload",
                uploaded, self.declared_slices
            ))));
        }

        self.uploaded_slices = uploaded;
        Ok(())
    }

    /// Ask the service to reassemble the slices into the original file.
    pub async fn merge(&mut self) -> Result<(), SttError> {
        self.require_state(SessionState::Uploading)?;
        // Merge on a partial upload is undefined server-side; refuse locally.
        if self.uploaded_slices != self.declared_slices {
            return Err(SttError::InvalidInput(format!(
                "merge requires all {} declared slices uploaded, have {}",
                self.declared_slices, self.uploaded_slices
            )));
        }
        self.ensure_not_cancelled()?;

        let task_id = match self.task_id.clone() {
            Some(id) => id,
            None => {
                return Err(self.fail(SttError::Protocol(
                    "session has no task id".to_string(),
                )))
            }
        };

        let api = self.api.as_ref();
        let credentials = &self.credentials;
        let result = send_with_retry(&self.retry, self.cancel.as_deref(), || {
            let task_id = task_id.clone();
            async move {
                let ctx = SigningContext::new(credentials)?;
                api.merge(&ctx, &task_id).await
            }
        })
        .await;

        result.map_err(|e| self.fail(e))?;
        tracing::info!("Merge accepted, task processing");
        self.state = SessionState::Merged;
        Ok(())
    }

    /// Poll the task's progress at the configured interval until the
    /// service reports completion, the attempt budget runs out, or the
    /// session is cancelled.
    pub async fn poll_until_done(&mut self) -> Result<(), SttError> {
        self.require_state(SessionState::Merged)?;
        self.state = SessionState::Polling;

        let task_id = match self.task_id.clone() {
            Some(id) => id,
            None => {
                return Err(self.fail(SttError::Protocol(
                    "session has no task id".to_string(),
                )))
            }
        };

        let max_attempts = self.options.max_poll_attempts;
        for attempt in 1..=max_attempts {
            self.ensure_not_cancelled()?;

            let api = self.api.as_ref();
            let credentials = &self.credentials;
            let result = send_with_retry(&self.retry, self.cancel.as_deref(), || {
                let task_id = task_id.clone();
                async move {
                    let ctx = SigningContext::new(credentials)?;
                    api.get_progress(&ctx, &task_id).await
                }
            })
            .await;

            let status = result.map_err(|e| self.fail(e))?;
            if status == STATUS_COMPLETE {
                tracing::info!("Processing complete after {} progress checks", attempt);
                self.state = SessionState::Completed;
                return Ok(());
            }

            tracing::debug!(
                "Task still processing: status={} (check {}/{})",
                status,
                attempt,
                max_attempts
            );
            if attempt < max_attempts {
                sleep(self.options.poll_interval).await;
            }
        }

        Err(self.fail(SttError::PollBudgetExhausted {
            attempts: max_attempts,
        }))
    }

    /// Fetch the finished transcript.
    pub async fn fetch_result(&mut self) -> Result<Vec<TranscriptSegment>, SttError> {
        self.require_state(SessionState::Completed)?;
        self.ensure_not_cancelled()?;

        let task_id = match self.task_id.clone() {
            Some(id) => id,
            None => {
                return Err(self.fail(SttError::Protocol(
                    "session has no task id".to_string(),
                )))
            }
        };

        let api = self.api.as_ref();
        let credentials = &self.credentials;
        let result = send_with_retry(&self.retry, self.cancel.as_deref(), || {
            let task_id = task_id.clone();
            async move {
                let ctx = SigningContext::new(credentials)?;
                api.get_result(&ctx, &task_id).await
            }
        })
        .await;

        let segments = result.map_err(|e| self.fail(e))?;
        tracing::info!("Transcript fetched: {} segments", segments.len());
        Ok(segments)
    }

    /// The whole workflow in order; stops at the first failure.
    pub async fn run(&mut self, path: &Path) -> Result<Vec<TranscriptSegment>, SttError> {
        self.prepare(path).await?;
        self.upload_all().await?;
        self.merge().await?;
        self.poll_until_done().await?;
        self.fetch_result().await
    }

    fn require_state(&self, expected: SessionState) -> Result<(), SttError> {
        if self.state != expected {
            return Err(SttError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn ensure_not_cancelled(&mut self) -> Result<(), SttError> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::SeqCst) {
                return Err(self.fail(SttError::Cancelled));
            }
        }
        Ok(())
    }

    fn fail(&mut self, error: SttError) -> SttError {
        tracing::error!("Session failed: {}", error);
        self.state = SessionState::Failed;
        error
    }
}

fn slice_count(file_len: u64) -> u32 {
    file_len.div_ceil(SLICE_SIZE as u64) as u32
}

/// Drive one remote call through the retry policy. Each attempt re-signs,
/// so no timestamp or signature is ever reused across requests.
async fn send_with_retry<T, F, Fut>(
    retry: &RetryPolicy,
    cancel: Option<&AtomicBool>,
    mut call: F,
) -> Result<T, SttError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SttError>>,
{
    let mut attempt = 0u8;
    loop {
        if let Some(flag) = cancel {
            if flag.load(Ordering::SeqCst) {
                return Err(SttError::Cancelled);
            }
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if retry.should_retry(attempt, &e) {
                    tracing::warn!("Remote call attempt {} failed: {}", attempt + 1, e);
                    retry.wait_before_retry(attempt).await;
                    attempt += 1;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    /// Simulated remote service: records every call, with configurable
    /// failure points and completion timing.
    #[derive(Default)]
    struct MockRemote {
        log: Mutex<Vec<String>>,
        reject_merge: bool,
        reject_upload_call: Option<u32>,
        drop_upload_call: Option<u32>,
        complete_after: u32,
        upload_calls: AtomicU32,
        progress_calls: AtomicU32,
        segments: Vec<TranscriptSegment>,
    }

    impl MockRemote {
        fn log_entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RaasrApi for Arc<MockRemote> {
        async fn prepare(
            &self,
            _ctx: &SigningContext,
            file_len: u64,
            file_name: &str,
            slice_num: u32,
        ) -> Result<String, SttError> {
            self.log.lock().unwrap().push(format!(
                "prepare:{}:{}:{}",
                file_len, file_name, slice_num
            ));
            Ok("task-123".to_string())
        }

        async fn upload(
            &self,
            _ctx: &SigningContext,
            _task_id: &str,
            slice_id: &str,
            content: Vec<u8>,
        ) -> Result<(), SttError> {
            let call = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reject_upload_call == Some(call) {
                return Err(SttError::RemoteRejected {
                    step: "upload",
                    reason: "slice refused".to_string(),
                });
            }
            if self.drop_upload_call == Some(call) {
                return Err(SttError::Network("connection reset".to_string()));
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("upload:{}:{}", slice_id, content.len()));
            Ok(())
        }

        async fn merge(&self, _ctx: &SigningContext, _task_id: &str) -> Result<(), SttError> {
            if self.reject_merge {
                return Err(SttError::RemoteRejected {
                    step: "merge",
                    reason: "task corrupt".to_string(),
                });
            }
            self.log.lock().unwrap().push("merge".to_string());
            Ok(())
        }

        async fn get_progress(
            &self,
            _ctx: &SigningContext,
            _task_id: &str,
        ) -> Result<i64, SttError> {
            let call = self.progress_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.log.lock().unwrap().push("getProgress".to_string());
            if call >= self.complete_after {
                Ok(STATUS_COMPLETE)
            } else {
                Ok(2)
            }
        }

        async fn get_result(
            &self,
            _ctx: &SigningContext,
            _task_id: &str,
        ) -> Result<Vec<TranscriptSegment>, SttError> {
            self.log.lock().unwrap().push("getResult".to_string());
            Ok(self.segments.clone())
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("test_app", "test_secret").unwrap()
    }

    fn options() -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 10,
            max_retries: 3,
        }
    }

    fn session(mock: &Arc<MockRemote>) -> TranscriptionSession {
        TranscriptionSession::new(Box::new(mock.clone()), credentials(), options())
    }

    fn audio_fixture(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0x5au8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    fn segments_fixture() -> Vec<TranscriptSegment> {
        vec![TranscriptSegment {
            begin_ms: 0,
            end_ms: 1500,
            text: "hello".to_string(),
        }]
    }

    #[test]
    fn test_slice_count_is_ceiling() {
        assert_eq!(slice_count(1), 1);
        assert_eq!(slice_count(SLICE_SIZE as u64), 1);
        assert_eq!(slice_count(SLICE_SIZE as u64 + 1), 2);
        assert_eq!(slice_count(3 * SLICE_SIZE as u64), 3);
    }

    #[tokio::test]
    async fn test_run_happy_path_single_slice() {
        let mock = Arc::new(MockRemote {
            complete_after: 1,
            segments: segments_fixture(),
            ..MockRemote::default()
        });
        let file = audio_fixture(100);

        let mut session = session(&mock);
        let segments = session.run(file.path()).await.unwrap();

        assert_eq!(segments, segments_fixture());
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.task_id(), Some("task-123"));

        let file_name = file.path().file_name().unwrap().to_str().unwrap();
        assert_eq!(
            mock.log_entries(),
            vec![
                format!("prepare:100:{}:1", file_name),
                "upload:aaaaaaaaaa:100".to_string(),
                "merge".to_string(),
                "getProgress".to_string(),
                "getResult".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_slices_file_in_order() {
        let mock = Arc::new(MockRemote {
            complete_after: 1,
            segments: segments_fixture(),
            ..MockRemote::default()
        });
        // One full slice plus a 5-byte tail.
        let file = audio_fixture(SLICE_SIZE + 5);

        let mut session = session(&mock);
        session.run(file.path()).await.unwrap();

        let log = mock.log_entries();
        assert!(log[0].ends_with(":2"), "two slices declared: {}", log[0]);
        assert_eq!(log[1], format!("upload:aaaaaaaaaa:{}", SLICE_SIZE));
        assert_eq!(log[2], "upload:aaaaaaaaab:5");
        assert_eq!(log[3], "merge");
    }

    #[tokio::test]
    async fn test_empty_file_rejected_before_prepare() {
        let mock = Arc::new(MockRemote::default());
        let file = audio_fixture(0);

        let mut session = session(&mock);
        let err = session.prepare(file.path()).await.unwrap_err();

        assert!(matches!(err, SttError::InvalidInput(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(mock.log_entries().is_empty());
    }

    #[tokio::test]
    async fn test_merge_rejection_stops_before_polling() {
        let mock = Arc::new(MockRemote {
            reject_merge: true,
            ..MockRemote::default()
        });
        let file = audio_fixture(64);

        let mut session = session(&mock);
        let err = session.run(file.path()).await.unwrap_err();

        assert!(matches!(
            err,
            SttError::RemoteRejected { step: "merge", .. }
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(
            !mock.log_entries().iter().any(|e| e == "getProgress"),
            "progress must not be polled after a merge rejection"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_three_times_with_interval_between() {
        let mock = Arc::new(MockRemote {
            complete_after: 3,
            segments: segments_fixture(),
            ..MockRemote::default()
        });
        let file = audio_fixture(64);

        let mut session = session(&mock);
        session.prepare(file.path()).await.unwrap();
        session.upload_all().await.unwrap();
        session.merge().await.unwrap();

        let start = tokio::time::Instant::now();
        session.poll_until_done().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(mock.progress_calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.state(), SessionState::Completed);
        // Two waits separate three checks.
        assert!(
            elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(15),
            "expected two 5s poll intervals, got {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhaustion() {
        let mock = Arc::new(MockRemote {
            complete_after: u32::MAX,
            ..MockRemote::default()
        });
        let file = audio_fixture(64);

        let mut session = TranscriptionSession::new(
            Box::new(mock.clone()),
            credentials(),
            SessionOptions {
                poll_interval: Duration::from_secs(5),
                max_poll_attempts: 4,
                max_retries: 0,
            },
        );
        session.prepare(file.path()).await.unwrap();
        session.upload_all().await.unwrap();
        session.merge().await.unwrap();

        let err = session.poll_until_done().await.unwrap_err();
        assert!(matches!(
            err,
            SttError::PollBudgetExhausted { attempts: 4 }
        ));
        assert_eq!(mock.progress_calls.load(Ordering::SeqCst), 4);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_upload_rejection_aborts_remaining_slices() {
        let mock = Arc::new(MockRemote {
            reject_upload_call: Some(1),
            ..MockRemote::default()
        });
        let file = audio_fixture(SLICE_SIZE + 5);

        let mut session = session(&mock);
        session.prepare(file.path()).await.unwrap();
        let err = session.upload_all().await.unwrap_err();

        assert!(matches!(
            err,
            SttError::RemoteRejected { step: "upload", .. }
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(
            mock.upload_calls.load(Ordering::SeqCst),
            1,
            "the second slice must not be attempted"
        );
        assert!(!mock.log_entries().iter().any(|e| e == "merge"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_retried_with_backoff() {
        let mock = Arc::new(MockRemote {
            drop_upload_call: Some(1),
            complete_after: 1,
            segments: segments_fixture(),
            ..MockRemote::default()
        });
        let file = audio_fixture(64);

        let mut session = session(&mock);
        session.run(file.path()).await.unwrap();

        assert_eq!(
            mock.upload_calls.load(Ordering::SeqCst),
            2,
            "dropped upload should be retried once"
        );
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_remote_calls() {
        let mock = Arc::new(MockRemote::default());
        let file = audio_fixture(64);
        let flag = Arc::new(AtomicBool::new(true));

        let mut session = session(&mock).with_cancel_flag(flag);
        let err = session.run(file.path()).await.unwrap_err();

        assert!(matches!(err, SttError::Cancelled));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(mock.log_entries().is_empty());
    }

    #[tokio::test]
    async fn test_operations_enforce_state_order() {
        let mock = Arc::new(MockRemote::default());

        let mut session = session(&mock);
        let err = session.upload_all().await.unwrap_err();
        assert!(matches!(
            err,
            SttError::InvalidState {
                expected: SessionState::Prepared,
                actual: SessionState::Created,
            }
        ));
        // A state misuse is a caller bug, not a session failure.
        assert_eq!(session.state(), SessionState::Created);

        let err = session.merge().await.unwrap_err();
        assert!(matches!(err, SttError::InvalidState { .. }));
        let err = session.poll_until_done().await.unwrap_err();
        assert!(matches!(err, SttError::InvalidState { .. }));
        let err = session.fetch_result().await.unwrap_err();
        assert!(matches!(err, SttError::InvalidState { .. }));
    }
}
