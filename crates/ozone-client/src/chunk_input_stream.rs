//! Sequential chunk reader for one key.
//!
//! Constructed from the chunk list returned by `getKey`; reads advance a
//! byte cursor across chunks, fetching each with `readChunk` on demand, and
//! return EOF once the sum of chunk lengths has been consumed.

use crate::calls;
use crate::manager::XceiverClientManager;
use crate::xceiver::XceiverClient;
use ozone_common::{Error, Result};
use ozone_proto::container::ChunkInfo;
use std::sync::Arc;
use tracing::debug;

pub struct ChunkInputStream {
    key_name: String,
    trace_id: String,
    manager: Arc<XceiverClientManager>,
    client: Option<Arc<XceiverClient>>,
    chunks: Vec<ChunkInfo>,
    chunk_index: usize,
    current: Option<Vec<u8>>,
    pos: usize,
}

impl ChunkInputStream {
    pub fn new(
        key_name: impl Into<String>,
        manager: Arc<XceiverClientManager>,
        client: Arc<XceiverClient>,
        chunks: Vec<ChunkInfo>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            key_name: key_name.into(),
            trace_id: trace_id.into(),
            manager,
            client: Some(client),
            chunks,
            chunk_index: 0,
            current: None,
            pos: 0,
        }
    }

    /// Total key length: the sum of chunk lengths.
    pub fn total_length(&self) -> u64 {
        self.chunks.iter().map(|c| c.len).sum()
    }

    /// Read into `buf`, returning the number of bytes read; 0 means EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            if self.current.is_none() {
                if self.chunk_index >= self.chunks.len() {
                    break;
                }
                self.fetch_chunk().await?;
            }
            let Some(data) = &self.current else { break };
            let available = data.len() - self.pos;
            if available == 0 {
                self.current = None;
                self.chunk_index += 1;
                self.pos = 0;
                continue;
            }
            let take = available.min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&data[self.pos..self.pos + take]);
            self.pos += take;
            copied += take;
        }
        Ok(copied)
    }

    /// Read the whole remainder of the key.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.total_length() as usize);
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    async fn fetch_chunk(&mut self) -> Result<()> {
        let chunk = self.chunks[self.chunk_index].clone();
        let client = self
            .client
            .as_ref()
            .cloned()
            .ok_or(Error::StreamClosed)?;
        debug!(
            key = %self.key_name,
            chunk = %chunk.chunk_name,
            "fetching chunk"
        );
        let data = calls::read_chunk(&client, &self.key_name, chunk, &self.trace_id).await?;
        self.current = Some(data);
        self.pos = 0;
        Ok(())
    }

    /// Release the pooled connection.
    pub async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            self.manager.release_client(client).await;
        }
    }
}
