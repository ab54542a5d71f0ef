//! Buffered chunk writer for one key.
//!
//! Bytes accumulate to the configured chunk size; each full buffer goes out
//! as one `writeChunk`, and `close` commits the chunk list with `putKey`.
//! Any chunk failure invalidates the stream: once chunks have been sent the
//! key cannot be resumed, only rewritten under a fresh name.

use crate::calls;
use crate::manager::XceiverClientManager;
use crate::xceiver::XceiverClient;
use bytes::{BufMut, BytesMut};
use ozone_common::checksum::chunk_checksum;
use ozone_common::{Error, Result};
use ozone_proto::container::{ChunkInfo, KeyData};
use std::sync::Arc;
use tracing::debug;

pub struct ChunkOutputStream {
    key_name: String,
    trace_id: String,
    manager: Arc<XceiverClientManager>,
    client: Option<Arc<XceiverClient>>,
    chunk_size: usize,
    buffer: BytesMut,
    chunks: Vec<ChunkInfo>,
    chunk_index: u64,
    offset: u64,
}

impl ChunkOutputStream {
    pub fn new(
        key_name: impl Into<String>,
        manager: Arc<XceiverClientManager>,
        client: Arc<XceiverClient>,
        trace_id: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            key_name: key_name.into(),
            trace_id: trace_id.into(),
            manager,
            client: Some(client),
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            chunks: Vec::new(),
            chunk_index: 0,
            offset: 0,
        }
    }

    /// Append bytes, emitting a chunk whenever the buffer fills.
    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.client.is_none() {
            return Err(Error::StreamClosed);
        }
        while !data.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.put_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.chunk_size {
                self.flush_chunk().await?;
            }
        }
        Ok(())
    }

    async fn flush_chunk(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let client = self
            .client
            .as_ref()
            .cloned()
            .ok_or(Error::StreamClosed)?;
        let payload = self.buffer.split().to_vec();
        let chunk = ChunkInfo {
            chunk_name: format!("{}_chunk_{}", self.key_name, self.chunk_index),
            offset: self.offset,
            len: payload.len() as u64,
            checksum: chunk_checksum(&payload),
            metadata: vec![],
        };
        debug!(
            key = %self.key_name,
            chunk = %chunk.chunk_name,
            len = chunk.len,
            "flushing chunk"
        );
        let len = chunk.len;
        if let Err(err) = calls::write_chunk(
            &client,
            &self.key_name,
            chunk.clone(),
            payload,
            &self.trace_id,
        )
        .await
        {
            // A failed chunk write invalidates the whole stream.
            self.abort().await;
            return Err(err);
        }
        self.chunks.push(chunk);
        self.offset += len;
        self.chunk_index += 1;
        Ok(())
    }

    /// Flush the tail chunk and commit the key.
    pub async fn close(&mut self) -> Result<()> {
        let Some(client) = self.client.as_ref().cloned() else {
            return Ok(());
        };
        self.flush_chunk().await?;

        let key_data = KeyData {
            container_name: client.pipeline().container_name.clone(),
            name: self.key_name.clone(),
            metadata: vec![],
            chunks: std::mem::take(&mut self.chunks),
        };
        let committed = calls::put_key(&client, key_data, &self.trace_id).await;
        self.abort().await;
        committed
    }

    /// Release the connection and refuse further writes.
    async fn abort(&mut self) {
        if let Some(client) = self.client.take() {
            self.manager.release_client(client).await;
        }
    }

    /// Bytes handed to the stream so far, flushed or buffered.
    pub fn bytes_written(&self) -> u64 {
        self.offset + self.buffer.len() as u64
    }
}
