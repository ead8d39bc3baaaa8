//! Stage grants: temporary credentials plus quota.

use super::api::StageData;
use crate::error::UploadError;
use chrono::{DateTime, Utc};
use std::fmt;

/// Short-lived storage credential issued by the stage endpoint.
#[derive(Clone, PartialEq)]
pub struct UploadCredential {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub bucket: String,
    /// Prefix every object key must start with
    pub key_prefix: String,
}

impl UploadCredential {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// Keep secrets out of logs.
impl fmt::Debug for UploadCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCredential")
            .field("access_key", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// Upload quota for one stage grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConstraint {
    /// Maximum total bytes across all files
    pub max_content_length: u64,
    /// Maximum number of files, if limited
    pub max_file_count: Option<u64>,
}

impl UploadConstraint {
    /// Check a batch of `file_count` files totalling `total_bytes`.
    pub fn check(&self, total_bytes: u64, file_count: u64) -> Result<(), UploadError> {
        if total_bytes > self.max_content_length {
            return Err(UploadError::ContentLengthExceeded {
                total: total_bytes,
                max: self.max_content_length,
            });
        }
        if let Some(max) = self.max_file_count {
            if file_count > max {
                return Err(UploadError::FileCountExceeded {
                    count: file_count,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// Everything one apply call returns.
#[derive(Debug, Clone, PartialEq)]
pub struct StageGrant {
    pub stage_name: String,
    pub credential: UploadCredential,
    pub constraint: UploadConstraint,
    pub endpoint: String,
    pub region: Option<String>,
}

impl StageGrant {
    pub fn from_data(stage_name: impl Into<String>, data: StageData) -> Self {
        Self {
            stage_name: stage_name.into(),
            credential: UploadCredential {
                access_key: data.credentials.tmp_ak,
                secret_key: data.credentials.tmp_sk,
                session_token: data.credentials.session_token,
                expires_at: data.credentials.expire_time,
                bucket: data.bucket_name,
                key_prefix: data.upload_path,
            },
            constraint: UploadConstraint {
                max_content_length: data.condition.max_content_length,
                max_file_count: data.condition.max_file_number,
            },
            endpoint: data.endpoint,
            region: data.region,
        }
    }

    /// Object key for `relative`, under the grant's key prefix.
    pub fn object_key(&self, relative: &str) -> String {
        let prefix = self.credential.key_prefix.trim_end_matches('/');
        let relative = relative.trim_start_matches('/');
        if prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", prefix, relative)
        }
    }
}
