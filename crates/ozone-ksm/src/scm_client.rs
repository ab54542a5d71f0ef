//! The seam between KSM and SCM.
//!
//! KSM only needs block brokering and compensating container deletion from
//! SCM; the trait keeps the managers independent of the transport. The gRPC
//! implementation lives with the daemon wiring, tests use a local fake.

use async_trait::async_trait;
use ozone_common::{AllocatedBlock, Result};

#[async_trait]
pub trait ScmBlockClient: Send + Sync {
    /// Allocate a block of `size` bytes; see SCM's `allocateBlock`.
    async fn allocate_block(&self, size: u64) -> Result<AllocatedBlock>;

    /// Forward key deletions to SCM's deleted-blocks log.
    async fn delete_blocks(&self, keys: Vec<String>) -> Result<()>;

    /// Delete a container, used to compensate a failed key allocation that
    /// created one.
    async fn delete_container(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ozone_common::{
        DatanodeDetails, Error, Pipeline, ReplicationFactor, ReplicationType,
    };
    use parking_lot::Mutex;
    use uuid::Uuid;

    /// In-memory stand-in for SCM used by manager tests.
    pub struct FakeScmBlockClient {
        pub next_create_container: Mutex<bool>,
        pub fail_allocation: Mutex<bool>,
        pub deleted_blocks: Mutex<Vec<String>>,
        pub deleted_containers: Mutex<Vec<String>>,
    }

    impl FakeScmBlockClient {
        pub fn new() -> Self {
            Self {
                next_create_container: Mutex::new(true),
                fail_allocation: Mutex::new(false),
                deleted_blocks: Mutex::new(Vec::new()),
                deleted_containers: Mutex::new(Vec::new()),
            }
        }

        fn pipeline(container: &str) -> Pipeline {
            Pipeline::new(
                container,
                vec![DatanodeDetails {
                    uuid: Uuid::new_v4(),
                    hostname: "dn1".to_string(),
                    ip_address: "127.0.0.1".to_string(),
                    container_port: 9859,
                }],
                ReplicationType::Standalone,
                ReplicationFactor::One,
            )
            .expect("static pipeline")
        }
    }

    #[async_trait]
    impl ScmBlockClient for FakeScmBlockClient {
        async fn allocate_block(&self, _size: u64) -> Result<AllocatedBlock> {
            if *self.fail_allocation.lock() {
                return Err(Error::rpc("scm unavailable"));
            }
            let container = format!("container-{}", Uuid::new_v4());
            Ok(AllocatedBlock {
                key: format!("0:{}", Uuid::new_v4()),
                pipeline: Self::pipeline(&container),
                create_container: *self.next_create_container.lock(),
            })
        }

        async fn delete_blocks(&self, keys: Vec<String>) -> Result<()> {
            self.deleted_blocks.lock().extend(keys);
            Ok(())
        }

        async fn delete_container(&self, name: &str) -> Result<()> {
            self.deleted_containers.lock().push(name.to_string());
            Ok(())
        }
    }
}
