//! Object storage transport for staged uploads.
//!
//! A [`ObjectStoreConnector`] turns a stage grant into something that can PUT
//! files. The S3 connector builds a fresh client for every grant since the
//! credentials change on refresh.

use super::credential::StageGrant;
use crate::error::UploadError;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// PUTs local files under object keys.
#[async_trait]
pub trait ObjectPut: Send + Sync {
    /// Upload the file at `path` to `key`. Returns the bytes written.
    async fn put_file(&self, key: &str, path: &Path) -> Result<u64, UploadError>;
}

/// Creates an [`ObjectPut`] for a stage grant.
pub trait ObjectStoreConnector: Send + Sync {
    fn connect(&self, grant: &StageGrant) -> Result<Arc<dyn ObjectPut>, UploadError>;
}

/// [`ObjectPut`] backed by any `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreUploader {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ObjectPut for ObjectStoreUploader {
    async fn put_file(&self, key: &str, path: &Path) -> Result<u64, UploadError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::LocalFile {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let len = data.len() as u64;

        let location = ObjectPath::from(key);
        self.store
            .put(&location, PutPayload::from(Bytes::from(data)))
            .await
            .map_err(|e| UploadError::Transient {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        debug!(key = %key, bytes = len, "Uploaded object");
        Ok(len)
    }
}

/// Connects to S3-compatible storage with the grant's temporary credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

impl S3Connector {
    fn endpoint_url(endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        }
    }
}

impl ObjectStoreConnector for S3Connector {
    fn connect(&self, grant: &StageGrant) -> Result<Arc<dyn ObjectPut>, UploadError> {
        let credential = &grant.credential;
        let endpoint = Self::endpoint_url(&grant.endpoint);

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&credential.bucket)
            .with_endpoint(&endpoint)
            .with_access_key_id(&credential.access_key)
            .with_secret_access_key(&credential.secret_key)
            .with_token(&credential.session_token)
            .with_allow_http(endpoint.starts_with("http://"));

        if let Some(ref region) = grant.region {
            builder = builder.with_region(region);
        }

        let store = builder
            .build()
            .map_err(|e| UploadError::Connect(e.to_string()))?;

        Ok(Arc::new(ObjectStoreUploader::new(Arc::new(store))))
    }
}

/// Always uploads into the same store, whatever the grant says.
#[derive(Debug, Clone)]
pub struct StaticStoreConnector {
    store: Arc<dyn ObjectStore>,
}

impl StaticStoreConnector {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl ObjectStoreConnector for StaticStoreConnector {
    fn connect(&self, _grant: &StageGrant) -> Result<Arc<dyn ObjectPut>, UploadError> {
        Ok(Arc::new(ObjectStoreUploader::new(Arc::clone(&self.store))))
    }
}
