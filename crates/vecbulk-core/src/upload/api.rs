//! Stage control API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Apply request: asks for temporary credentials for a stage path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyStageRequest {
    /// Stage to upload into
    pub stage_name: String,
    /// Target path within the stage
    pub path: String,
}

/// Response envelope returned by the control endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyStageResponse {
    /// Zero on success
    pub code: i64,
    /// Error description when `code` is non-zero
    #[serde(default)]
    pub message: String,
    /// Stage grant on success
    #[serde(default)]
    pub data: Option<StageData>,
}

/// Grant payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageData {
    pub credentials: StageCredentials,
    pub bucket_name: String,
    /// Key prefix every uploaded object must start with
    pub upload_path: String,
    pub endpoint: String,
    #[serde(default)]
    pub region: Option<String>,
    pub condition: StageCondition,
}

/// Temporary storage credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCredentials {
    #[serde(rename = "tmpAK")]
    pub tmp_ak: String,
    #[serde(rename = "tmpSK")]
    pub tmp_sk: String,
    #[serde(rename = "sessionToken")]
    pub session_token: String,
    /// RFC 3339 expiry
    #[serde(rename = "expireTime")]
    pub expire_time: DateTime<Utc>,
}

/// Stage quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCondition {
    pub max_content_length: u64,
    #[serde(default)]
    pub max_file_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = ApplyStageRequest {
            stage_name: "stage-a".into(),
            path: "batch/1/".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"stageName": "stage-a", "path": "batch/1/"})
        );
    }

    #[test]
    fn test_response_deserializes() {
        let body = json!({
            "code": 0,
            "data": {
                "credentials": {
                    "tmpAK": "ak",
                    "tmpSK": "sk",
                    "sessionToken": "token",
                    "expireTime": "2026-01-02T03:04:05Z"
                },
                "bucketName": "bucket",
                "uploadPath": "stages/abc/batch/1/",
                "endpoint": "s3.us-west-2.amazonaws.com",
                "region": "us-west-2",
                "condition": {"maxContentLength": 1073741824, "maxFileNumber": 1000}
            }
        });
        let response: ApplyStageResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.code, 0);
        let data = response.data.unwrap();
        assert_eq!(data.credentials.tmp_ak, "ak");
        assert_eq!(
            data.credentials.expire_time,
            Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
        );
        assert_eq!(data.condition.max_file_number, Some(1000));
        assert_eq!(data.upload_path, "stages/abc/batch/1/");
    }

    #[test]
    fn test_error_envelope() {
        let response: ApplyStageResponse =
            serde_json::from_value(json!({"code": 1800, "message": "invalid api key"})).unwrap();
        assert_eq!(response.code, 1800);
        assert!(response.data.is_none());
    }
}
