//! Staged uploads to object storage.
//!
//! A stage is a named remote upload target. Applying to it returns temporary
//! S3-compatible credentials, a key prefix and a quota. [`UploadSession`]
//! keeps that grant fresh while it PUTs files with bounded concurrency.

pub mod api;
mod credential;
mod session;
mod stage_client;
mod store;

pub use api::ApplyStageRequest;
pub use credential::{StageGrant, UploadConstraint, UploadCredential};
pub use session::{
    FailedUpload, UploadOptions, UploadResult, UploadSession, UploadedFile, DEFAULT_CONCURRENCY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY,
};
pub use stage_client::{parse_envelope, HttpStageClient, StageClient};
pub use store::{
    ObjectPut, ObjectStoreConnector, ObjectStoreUploader, S3Connector, StaticStoreConnector,
};
