// src/stt/mod.rs
// Remote Transcription Client

mod retry;
mod session;
mod signer;
mod slice_id;
mod transport;
mod types;

pub use retry::RetryPolicy;
pub use session::{SessionState, TranscriptionSession, SLICE_SIZE, STATUS_COMPLETE};
pub use signer::{sign, SigningContext};
pub use slice_id::SliceIdGenerator;
pub use transport::{RaasrHttpClient, DEFAULT_ENDPOINT};
pub use types::{parse_progress, parse_segments, ApiEnvelope, SttError, TranscriptSegment};

use async_trait::async_trait;

/// The five remote operations of the chunked-upload transcription protocol.
///
/// Each call carries the signing context built by the session for that one
/// request; implementations stay free of credential handling. The reqwest
/// transport implements this against the real service, tests substitute a
/// simulated remote.
#[async_trait]
pub trait RaasrApi: Send + Sync {
    /// Declare a new task; returns the task id attached to every later call.
    async fn prepare(
        &self,
        ctx: &SigningContext,
        file_len: u64,
        file_name: &str,
        slice_num: u32,
    ) -> Result<String, SttError>;

    /// Upload one slice of the file.
    async fn upload(
        &self,
        ctx: &SigningContext,
        task_id: &str,
        slice_id: &str,
        content: Vec<u8>,
    ) -> Result<(), SttError>;

    /// Ask the service to reassemble the uploaded slices.
    async fn merge(&self, ctx: &SigningContext, task_id: &str) -> Result<(), SttError>;

    /// Fetch the task's progress status code.
    async fn get_progress(&self, ctx: &SigningContext, task_id: &str) -> Result<i64, SttError>;

    /// Fetch the finished transcript as ordered timed segments.
    async fn get_result(
        &self,
        ctx: &SigningContext,
        task_id: &str,
    ) -> Result<Vec<TranscriptSegment>, SttError>;
}
