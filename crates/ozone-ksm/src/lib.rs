//! Ozone Key-Space Manager (KSM) core.
//!
//! KSM is the authoritative metadata service for the Volume/Bucket/Key
//! namespace. All records live in one ordered metadata store under a key
//! encoding whose lexicographic order is the listing primitive; block
//! placement is delegated to SCM.

pub mod bucket_manager;
pub mod errors;
pub mod key_manager;
pub mod metadata_manager;
pub mod metrics;
pub mod scm_client;
pub mod service;
pub mod volume_manager;

pub use bucket_manager::BucketManager;
pub use errors::{KsmError, KsmResult, ResultCode};
pub use key_manager::{KeyArgs, KeyManager};
pub use metadata_manager::MetadataManager;
pub use metrics::KsmMetrics;
pub use scm_client::ScmBlockClient;
pub use service::KeySpaceManagerService;
pub use volume_manager::{VolumeArgs, VolumeManager};
