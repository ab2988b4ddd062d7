// src/stt/transport.rs
// HTTP transport for the transcription service

use super::{
    parse_progress, parse_segments, ApiEnvelope, RaasrApi, SigningContext, SttError,
    TranscriptSegment,
};
use async_trait::async_trait;
use reqwest::multipart;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://raasr.xfyun.cn/api";
const TIMEOUT_SECS: u64 = 60;

/// reqwest-backed implementation of the five remote calls. Requests are
/// form-encoded except upload, which is multipart so the slice bytes ride
/// along with the signed fields.
pub struct RaasrHttpClient {
    base_url: String,
    client: reqwest::Client,
}

impl RaasrHttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!("Transcription client initialized: endpoint={}", base_url);

        Self { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_form(
        &self,
        step: &'static str,
        path: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<ApiEnvelope, SttError> {
        let response = self.client.post(self.url(path)).form(&params).send().await;
        Self::read_envelope(step, response).await
    }

    async fn read_envelope(
        step: &'static str,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<ApiEnvelope, SttError> {
        match response {
            Ok(resp) => {
                let envelope: ApiEnvelope = resp
                    .json()
                    .await
                    .map_err(|e| SttError::Network(format!("non-JSON response: {}", e)))?;

                if envelope.is_success() {
                    Ok(envelope)
                } else {
                    let reason = envelope.failure_reason();
                    tracing::warn!("{} rejected by remote: {}", step, reason);
                    Err(SttError::RemoteRejected { step, reason })
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    Err(SttError::Timeout)
                } else {
                    Err(SttError::Network(e.to_string()))
                }
            }
        }
    }

    fn require_data(step: &'static str, envelope: ApiEnvelope) -> Result<String, SttError> {
        envelope
            .data
            .ok_or_else(|| SttError::Protocol(format!("{} response missing data field", step)))
    }
}

#[async_trait]
impl RaasrApi for RaasrHttpClient {
    async fn prepare(
        &self,
        ctx: &SigningContext,
        file_len: u64,
        file_name: &str,
        slice_num: u32,
    ) -> Result<String, SttError> {
        tracing::info!(
            "prepare: file={}, len={}, slices={}",
            file_name,
            file_len,
            slice_num
        );

        let envelope = self
            .post_form(
                "prepare",
                "prepare",
                vec![
                    ("app_id", ctx.app_id.clone()),
                    ("signa", ctx.signa.clone()),
                    ("ts", ctx.ts.clone()),
                    ("file_len", file_len.to_string()),
                    ("file_name", file_name.to_string()),
                    ("slice_num", slice_num.to_string()),
                ],
            )
            .await?;

        Self::require_data("prepare", envelope)
    }

    async fn upload(
        &self,
        ctx: &SigningContext,
        task_id: &str,
        slice_id: &str,
        content: Vec<u8>,
    ) -> Result<(), SttError> {
        tracing::debug!("upload: slice={}, bytes={}", slice_id, content.len());

        let form = multipart::Form::new()
            .text("app_id", ctx.app_id.clone())
            .text("signa", ctx.signa.clone())
            .text("ts", ctx.ts.clone())
            .text("task_id", task_id.to_string())
            .text("slice_id", slice_id.to_string())
            .text("filename", slice_id.to_string())
            .part("content", multipart::Part::bytes(content));

        let response = self
            .client
            .post(self.url("upload"))
            .multipart(form)
            .send()
            .await;

        Self::read_envelope("upload", response).await?;
        Ok(())
    }

    async fn merge(&self, ctx: &SigningContext, task_id: &str) -> Result<(), SttError> {
        tracing::info!("merge: task={}", task_id);

        self.post_form(
            "merge",
            "merge",
            vec![
                ("app_id", ctx.app_id.clone()),
                ("signa", ctx.signa.clone()),
                ("ts", ctx.ts.clone()),
                ("task_id", task_id.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_progress(&self, ctx: &SigningContext, task_id: &str) -> Result<i64, SttError> {
        let envelope = self
            .post_form(
                "getProgress",
                "getProgress",
                vec![
                    ("app_id", ctx.app_id.clone()),
                    ("signa", ctx.signa.clone()),
                    ("ts", ctx.ts.clone()),
                    ("task_id", task_id.to_string()),
                ],
            )
            .await?;

        parse_progress(&Self::require_data("getProgress", envelope)?)
    }

    async fn get_result(
        &self,
        ctx: &SigningContext,
        task_id: &str,
    ) -> Result<Vec<TranscriptSegment>, SttError> {
        tracing::info!("getResult: task={}", task_id);

        let envelope = self
            .post_form(
                "getResult",
                "getResult",
                vec![
                    ("app_id", ctx.app_id.clone()),
                    ("signa", ctx.signa.clone()),
                    ("ts", ctx.ts.clone()),
                    ("task_id", task_id.to_string()),
                ],
            )
            .await?;

        parse_segments(&Self::require_data("getResult", envelope)?)
    }
}

impl Default for RaasrHttpClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}
