//! On-disk container storage.
//!
//! Each container is a directory under the data root; chunk payloads are
//! files named by the hex of their chunk name, key metadata is kept in the
//! in-memory index. The directory layout is datanode-internal.

use ozone_common::checksum::verify_chunk;
use ozone_common::{Error, NodeStat, Result};
use ozone_proto::container::{ChunkInfo, ContainerData, KeyData};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

struct Container {
    dir: PathBuf,
    metadata: Vec<ozone_proto::hdds::KeyValue>,
    keys: HashMap<String, KeyData>,
    bytes_used: u64,
    open: bool,
}

pub struct ContainerEngine {
    root: PathBuf,
    capacity: u64,
    containers: RwLock<HashMap<String, Container>>,
}

impl ContainerEngine {
    pub fn new(root: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            capacity,
            containers: RwLock::new(HashMap::new()),
        })
    }

    fn chunk_path(dir: &Path, chunk_name: &str) -> PathBuf {
        dir.join(format!("{}.chunk", hex::encode(chunk_name)))
    }

    pub fn create_container(
        &self,
        name: &str,
        metadata: Vec<ozone_proto::hdds::KeyValue>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("container name must not be empty"));
        }
        let mut containers = self.containers.write();
        if containers.contains_key(name) {
            return Err(Error::ContainerAlreadyExists(name.to_string()));
        }
        let dir = self.root.join(hex::encode(name));
        fs::create_dir_all(&dir)?;
        containers.insert(
            name.to_string(),
            Container {
                dir,
                metadata,
                keys: HashMap::new(),
                bytes_used: 0,
                open: true,
            },
        );
        info!(container = name, "created container");
        Ok(())
    }

    pub fn read_container(&self, name: &str) -> Result<ContainerData> {
        let containers = self.containers.read();
        let container = containers
            .get(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        Ok(ContainerData {
            name: name.to_string(),
            metadata: container.metadata.clone(),
            bytes_used: container.bytes_used,
            key_count: container.keys.len() as u64,
            open: container.open,
        })
    }

    pub fn delete_container(&self, name: &str) -> Result<()> {
        let mut containers = self.containers.write();
        let container = containers
            .remove(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        fs::remove_dir_all(&container.dir)?;
        info!(container = name, "deleted container");
        Ok(())
    }

    /// Persist one chunk. The payload must match the declared length and
    /// checksum.
    pub fn write_chunk(
        &self,
        container_name: &str,
        key_name: &str,
        chunk: &ChunkInfo,
        data: &[u8],
    ) -> Result<()> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(container_name)
            .ok_or_else(|| Error::ContainerNotFound(container_name.to_string()))?;
        if !container.open {
            return Err(Error::ContainerClosed(container_name.to_string()));
        }
        if data.len() as u64 != chunk.len {
            return Err(Error::invalid_argument(format!(
                "chunk {} declares {} bytes but carries {}",
                chunk.chunk_name,
                chunk.len,
                data.len()
            )));
        }
        verify_chunk(data, &chunk.checksum)?;

        fs::write(Self::chunk_path(&container.dir, &chunk.chunk_name), data)?;
        container.bytes_used += chunk.len;
        debug!(
            container = container_name,
            key = key_name,
            chunk = %chunk.chunk_name,
            len = chunk.len,
            "wrote chunk"
        );
        Ok(())
    }

    /// Read one chunk back, verifying it against the recorded checksum.
    pub fn read_chunk(
        &self,
        container_name: &str,
        key_name: &str,
        chunk: &ChunkInfo,
    ) -> Result<Vec<u8>> {
        let containers = self.containers.read();
        let container = containers
            .get(container_name)
            .ok_or_else(|| Error::ContainerNotFound(container_name.to_string()))?;
        let path = Self::chunk_path(&container.dir, &chunk.chunk_name);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ChunkNotFound(chunk.chunk_name.clone())
            } else {
                Error::Io(e)
            }
        })?;
        verify_chunk(&data, &chunk.checksum)?;
        debug!(
            container = container_name,
            key = key_name,
            chunk = %chunk.chunk_name,
            "read chunk"
        );
        Ok(data)
    }

    /// Record a key's chunk list.
    pub fn put_key(&self, key_data: KeyData) -> Result<()> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&key_data.container_name)
            .ok_or_else(|| Error::ContainerNotFound(key_data.container_name.clone()))?;
        if !container.open {
            return Err(Error::ContainerClosed(key_data.container_name.clone()));
        }
        container.keys.insert(key_data.name.clone(), key_data);
        Ok(())
    }

    pub fn get_key(&self, container_name: &str, key_name: &str) -> Result<KeyData> {
        let containers = self.containers.read();
        let container = containers
            .get(container_name)
            .ok_or_else(|| Error::ContainerNotFound(container_name.to_string()))?;
        container
            .keys
            .get(key_name)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(key_name.to_string()))
    }

    /// Drop a key and its chunk files.
    pub fn delete_key(&self, container_name: &str, key_name: &str) -> Result<()> {
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(container_name)
            .ok_or_else(|| Error::ContainerNotFound(container_name.to_string()))?;
        let key_data = container
            .keys
            .remove(key_name)
            .ok_or_else(|| Error::KeyNotFound(key_name.to_string()))?;
        for chunk in &key_data.chunks {
            let path = Self::chunk_path(&container.dir, &chunk.chunk_name);
            if path.exists() {
                fs::remove_file(path)?;
            }
            container.bytes_used = container.bytes_used.saturating_sub(chunk.len);
        }
        Ok(())
    }

    /// Storage stats advertised to SCM.
    pub fn node_stat(&self) -> NodeStat {
        let used: u64 = self
            .containers
            .read()
            .values()
            .map(|c| c.bytes_used)
            .sum();
        NodeStat::new(self.capacity, used, self.capacity.saturating_sub(used))
    }

    /// Per-container usage for the SCM container report.
    pub fn container_report(&self) -> Vec<(String, u64, u64)> {
        self.containers
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.bytes_used, c.keys.len() as u64))
            .collect()
    }
}
