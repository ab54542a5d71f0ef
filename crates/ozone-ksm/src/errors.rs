//! KSM error type and its translation to the wire status.

use ozone_meta::MetaStoreError;
use ozone_proto::ksm::Status;
use thiserror::Error;

pub type KsmResult<T> = std::result::Result<T, KsmError>;

/// Internal result codes, one per wire status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    VolumeAlreadyExists,
    VolumeNotFound,
    VolumeNotEmpty,
    TooManyUserVolumes,
    UserNotFound,
    BucketAlreadyExists,
    BucketNotFound,
    BucketNotEmpty,
    KeyAlreadyExists,
    KeyNotFound,
    AccessDenied,
    InternalError,
}

/// Error raised by KSM managers. Precondition failures carry the matching
/// result code; store failures become `InternalError`.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct KsmError {
    pub result: ResultCode,
    pub message: String,
}

impl KsmError {
    pub fn new(result: ResultCode, message: impl Into<String>) -> Self {
        Self {
            result,
            message: message.into(),
        }
    }

    /// Whether this error should be logged at ERROR (internal faults) as
    /// opposed to a client precondition failure.
    pub fn is_internal(&self) -> bool {
        self.result == ResultCode::InternalError
    }

    pub fn to_status(&self) -> Status {
        match self.result {
            ResultCode::VolumeAlreadyExists => Status::VolumeAlreadyExists,
            ResultCode::VolumeNotFound => Status::VolumeNotFound,
            ResultCode::VolumeNotEmpty => Status::VolumeNotEmpty,
            ResultCode::TooManyUserVolumes => Status::UserTooManyVolumes,
            ResultCode::UserNotFound => Status::UserNotFound,
            ResultCode::BucketAlreadyExists => Status::BucketAlreadyExists,
            ResultCode::BucketNotFound => Status::BucketNotFound,
            ResultCode::BucketNotEmpty => Status::BucketNotEmpty,
            ResultCode::KeyAlreadyExists => Status::KeyAlreadyExists,
            ResultCode::KeyNotFound => Status::KeyNotFound,
            ResultCode::AccessDenied => Status::AccessDenied,
            ResultCode::InternalError => Status::InternalError,
        }
    }
}

impl From<MetaStoreError> for KsmError {
    fn from(err: MetaStoreError) -> Self {
        Self::new(ResultCode::InternalError, err.to_string())
    }
}
