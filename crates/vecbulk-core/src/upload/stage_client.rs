//! Stage control endpoint client.

use super::api::{ApplyStageRequest, ApplyStageResponse};
use super::credential::StageGrant;
use crate::error::UploadError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Issues stage grants.
#[async_trait]
pub trait StageClient: Send + Sync {
    /// Request temporary credentials and quota for `request.path`.
    async fn apply(&self, request: &ApplyStageRequest) -> Result<StageGrant, UploadError>;
}

/// HTTP client for `<endpoint>/v2/stages/apply`.
#[derive(Debug, Clone)]
pub struct HttpStageClient {
    client: Client,
    base_uri: String,
    api_key: String,
}

impl HttpStageClient {
    /// Create a client with the given request timeout.
    pub fn new(
        endpoint: impl AsRef<str>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Apply(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_uri: endpoint.as_ref().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn apply_url(&self) -> String {
        format!("{}/v2/stages/apply", self.base_uri)
    }
}

#[async_trait]
impl StageClient for HttpStageClient {
    async fn apply(&self, request: &ApplyStageRequest) -> Result<StageGrant, UploadError> {
        let url = self.apply_url();
        debug!(url = %url, stage = %request.stage_name, path = %request.path, "Applying for stage");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| UploadError::Apply(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Apply(format!("{}: {}", status, body)));
        }

        let envelope: ApplyStageResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Apply(format!("Invalid apply response: {}", e)))?;

        parse_envelope(&request.stage_name, envelope)
    }
}

/// Turn a response envelope into a grant.
pub fn parse_envelope(
    stage_name: &str,
    envelope: ApplyStageResponse,
) -> Result<StageGrant, UploadError> {
    if envelope.code != 0 {
        return Err(UploadError::Apply(format!(
            "code {}: {}",
            envelope.code, envelope.message
        )));
    }
    let data = envelope
        .data
        .ok_or_else(|| UploadError::Apply("apply response has no data".into()))?;
    Ok(StageGrant::from_data(stage_name, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_url() {
        let client =
            HttpStageClient::new("https://api.example.com/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(client.apply_url(), "https://api.example.com/v2/stages/apply");
    }

    #[test]
    fn test_parse_envelope() {
        let envelope: ApplyStageResponse = serde_json::from_value(json!({
            "code": 0,
            "data": {
                "credentials": {
                    "tmpAK": "ak",
                    "tmpSK": "sk",
                    "sessionToken": "token",
                    "expireTime": "2030-01-01T00:00:00Z"
                },
                "bucketName": "bucket",
                "uploadPath": "stages/s/run-1/",
                "endpoint": "storage.example.com",
                "condition": {"maxContentLength": 5000}
            }
        }))
        .unwrap();

        let grant = parse_envelope("s", envelope).unwrap();
        assert_eq!(grant.stage_name, "s");
        assert_eq!(grant.credential.bucket, "bucket");
        assert_eq!(grant.credential.key_prefix, "stages/s/run-1/");
        assert_eq!(grant.constraint.max_content_length, 5000);
        assert_eq!(grant.constraint.max_file_count, None);
        assert_eq!(grant.region, None);
    }

    #[test]
    fn test_parse_envelope_error_code() {
        let envelope: ApplyStageResponse =
            serde_json::from_value(json!({"code": 65535, "message": "stage not found"})).unwrap();
        let err = parse_envelope("s", envelope).unwrap_err();
        assert_eq!(err, UploadError::Apply("code 65535: stage not found".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_envelope_without_data() {
        let envelope: ApplyStageResponse = serde_json::from_value(json!({"code": 0})).unwrap();
        assert!(parse_envelope("s", envelope).is_err());
    }
}
