//! Data-plane command dispatcher.
//!
//! Every container command resolves to a response envelope carrying a
//! `Result` code; the transport never sees engine failures.

use crate::engine::ContainerEngine;
use ozone_common::Error;
use ozone_proto::container::{
    ContainerCommandRequestProto, ContainerCommandResponseProto, GetKeyResponseProto,
    GetSmallFileResponseProto, KeyData, ReadChunkResponseProto, ReadContainerResponseProto,
    Result as ContainerResult, Type,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const TYPE_COUNT: usize = 11;

/// Per-command-type counters for the data plane.
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    ops: [AtomicU64; TYPE_COUNT],
    failures: [AtomicU64; TYPE_COUNT],
}

impl DispatcherMetrics {
    fn record(&self, cmd_type: Type, success: bool) {
        let idx = cmd_type as usize;
        self.ops[idx].fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn ops(&self, cmd_type: Type) -> u64 {
        self.ops[cmd_type as usize].load(Ordering::Relaxed)
    }

    pub fn failures(&self, cmd_type: Type) -> u64 {
        self.failures[cmd_type as usize].load(Ordering::Relaxed)
    }
}

pub struct Dispatcher {
    engine: Arc<ContainerEngine>,
    metrics: Arc<DispatcherMetrics>,
}

fn result_code(err: &Error) -> ContainerResult {
    match err {
        Error::ContainerAlreadyExists(_) => ContainerResult::ContainerExists,
        Error::ContainerNotFound(_) => ContainerResult::ContainerNotFound,
        Error::ContainerClosed(_) => ContainerResult::ClosedContainerIo,
        Error::KeyNotFound(_) => ContainerResult::KeyNotFound,
        Error::ChunkNotFound(_) => ContainerResult::ChunkNotFound,
        Error::ChecksumMismatch { .. } => ContainerResult::ChecksumMismatch,
        Error::InvalidArgument(_) => ContainerResult::InvalidArgument,
        Error::Io(_) => ContainerResult::IoError,
        _ => ContainerResult::ContainerInternalError,
    }
}

struct Reply {
    result: ContainerResult,
    message: String,
    read_container: Option<ReadContainerResponseProto>,
    read_chunk: Option<ReadChunkResponseProto>,
    get_key: Option<GetKeyResponseProto>,
    get_small_file: Option<GetSmallFileResponseProto>,
}

impl Reply {
    fn success() -> Self {
        Self {
            result: ContainerResult::Success,
            message: String::new(),
            read_container: None,
            read_chunk: None,
            get_key: None,
            get_small_file: None,
        }
    }

    fn failure(result: ContainerResult, message: String) -> Self {
        Self {
            result,
            message,
            ..Self::success()
        }
    }

    fn from_error(err: Error) -> Self {
        Self::failure(result_code(&err), err.to_string())
    }

    fn malformed(what: &str) -> Self {
        Self::failure(
            ContainerResult::MalformedRequest,
            format!("missing {what} in request"),
        )
    }
}

impl Dispatcher {
    pub fn new(engine: Arc<ContainerEngine>) -> Self {
        Self {
            engine,
            metrics: Arc::new(DispatcherMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &Arc<DispatcherMetrics> {
        &self.metrics
    }

    /// Handle one container command.
    pub fn dispatch(&self, request: ContainerCommandRequestProto) -> ContainerCommandResponseProto {
        let cmd_type = Type::try_from(request.cmd_type).unwrap_or(Type::InvalidCommand);
        let trace_id = request.trace_id.clone();

        let reply = match cmd_type {
            Type::CreateContainer => self.create_container(&request),
            Type::ReadContainer => self.read_container(&request),
            Type::DeleteContainer => self.delete_container(&request),
            Type::WriteChunk => self.write_chunk(&request),
            Type::ReadChunk => self.read_chunk(&request),
            Type::PutKey => self.put_key(&request),
            Type::GetKey => self.get_key(&request),
            Type::DeleteKey => self.delete_key(&request),
            Type::PutSmallFile => self.put_small_file(&request),
            Type::GetSmallFile => self.get_small_file(&request),
            Type::InvalidCommand => Reply::failure(
                ContainerResult::UnsupportedRequest,
                format!("unsupported command type: {}", request.cmd_type),
            ),
        };

        let success = reply.result == ContainerResult::Success;
        self.metrics.record(cmd_type, success);
        if !success {
            debug!(
                cmd = ?cmd_type,
                trace = %trace_id,
                result = ?reply.result,
                message = %reply.message,
                "container command failed"
            );
        }

        ContainerCommandResponseProto {
            cmd_type: cmd_type as i32,
            trace_id,
            result: reply.result as i32,
            message: reply.message,
            read_container: reply.read_container,
            read_chunk: reply.read_chunk,
            get_key: reply.get_key,
            get_small_file: reply.get_small_file,
        }
    }

    fn create_container(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.create_container else {
            return Reply::malformed("createContainer");
        };
        let Some(data) = &req.container_data else {
            return Reply::malformed("container data");
        };
        match self
            .engine
            .create_container(&data.name, data.metadata.clone())
        {
            Ok(()) => Reply::success(),
            Err(err) => Reply::from_error(err),
        }
    }

    fn read_container(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.read_container else {
            return Reply::malformed("readContainer");
        };
        match self.engine.read_container(&req.container_name) {
            Ok(data) => Reply {
                read_container: Some(ReadContainerResponseProto {
                    container_data: Some(data),
                }),
                ..Reply::success()
            },
            Err(err) => Reply::from_error(err),
        }
    }

    fn delete_container(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.delete_container else {
            return Reply::malformed("deleteContainer");
        };
        match self.engine.delete_container(&req.container_name) {
            Ok(()) => Reply::success(),
            Err(err) => Reply::from_error(err),
        }
    }

    fn write_chunk(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.write_chunk else {
            return Reply::malformed("writeChunk");
        };
        let Some(pipeline) = &req.pipeline else {
            return Reply::malformed("pipeline");
        };
        let Some(chunk) = &req.chunk_data else {
            return Reply::malformed("chunk info");
        };
        match self
            .engine
            .write_chunk(&pipeline.container_name, &req.key_name, chunk, &req.data)
        {
            Ok(()) => Reply::success(),
            Err(err) => Reply::from_error(err),
        }
    }

    fn read_chunk(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.read_chunk else {
            return Reply::malformed("readChunk");
        };
        let Some(pipeline) = &req.pipeline else {
            return Reply::malformed("pipeline");
        };
        let Some(chunk) = &req.chunk_data else {
            return Reply::malformed("chunk info");
        };
        match self
            .engine
            .read_chunk(&pipeline.container_name, &req.key_name, chunk)
        {
            Ok(data) => Reply {
                read_chunk: Some(ReadChunkResponseProto {
                    chunk_data: Some(chunk.clone()),
                    data,
                }),
                ..Reply::success()
            },
            Err(err) => Reply::from_error(err),
        }
    }

    fn put_key(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.put_key else {
            return Reply::malformed("putKey");
        };
        let Some(key_data) = &req.key_data else {
            return Reply::malformed("key data");
        };
        match self.engine.put_key(key_data.clone()) {
            Ok(()) => Reply::success(),
            Err(err) => Reply::from_error(err),
        }
    }

    fn get_key(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.get_key else {
            return Reply::malformed("getKey");
        };
        let Some(key_data) = &req.key_data else {
            return Reply::malformed("key data");
        };
        match self.engine.get_key(&key_data.container_name, &key_data.name) {
            Ok(key_data) => Reply {
                get_key: Some(GetKeyResponseProto {
                    key_data: Some(key_data),
                }),
                ..Reply::success()
            },
            Err(err) => Reply::from_error(err),
        }
    }

    fn delete_key(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.delete_key else {
            return Reply::malformed("deleteKey");
        };
        let Some(pipeline) = &req.pipeline else {
            return Reply::malformed("pipeline");
        };
        match self.engine.delete_key(&pipeline.container_name, &req.name) {
            Ok(()) => Reply::success(),
            Err(err) => Reply::from_error(err),
        }
    }

    /// One RPC carrying both the chunk payload and the key commit.
    fn put_small_file(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.put_small_file else {
            return Reply::malformed("putSmallFile");
        };
        let Some(key_req) = &req.key else {
            return Reply::malformed("putKey");
        };
        let Some(key_data) = &key_req.key_data else {
            return Reply::malformed("key data");
        };
        let Some(chunk) = &req.chunk_info else {
            return Reply::malformed("chunk info");
        };

        if let Err(err) =
            self.engine
                .write_chunk(&key_data.container_name, &key_data.name, chunk, &req.data)
        {
            return Reply::from_error(err);
        }
        let stored = KeyData {
            chunks: vec![chunk.clone()],
            ..key_data.clone()
        };
        match self.engine.put_key(stored) {
            Ok(()) => Reply::success(),
            Err(err) => Reply::from_error(err),
        }
    }

    fn get_small_file(&self, request: &ContainerCommandRequestProto) -> Reply {
        let Some(req) = &request.get_small_file else {
            return Reply::malformed("getSmallFile");
        };
        let Some(key_req) = &req.key else {
            return Reply::malformed("getKey");
        };
        let Some(key_data) = &key_req.key_data else {
            return Reply::malformed("key data");
        };
        let stored = match self.engine.get_key(&key_data.container_name, &key_data.name) {
            Ok(stored) => stored,
            Err(err) => return Reply::from_error(err),
        };
        let Some(chunk) = stored.chunks.first() else {
            return Reply::failure(
                ContainerResult::ChunkNotFound,
                format!("key {} holds no chunks", stored.name),
            );
        };
        match self
            .engine
            .read_chunk(&stored.container_name, &stored.name, chunk)
        {
            Ok(data) => Reply {
                get_small_file: Some(GetSmallFileResponseProto {
                    data: Some(ReadChunkResponseProto {
                        chunk_data: Some(chunk.clone()),
                        data,
                    }),
                }),
                ..Reply::success()
            },
            Err(err) => Reply::from_error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ozone_common::checksum::chunk_checksum;
    use ozone_proto::container::{
        ChunkInfo, ContainerData, CreateContainerRequestProto, GetKeyRequestProto,
        GetSmallFileRequestProto, PutKeyRequestProto, PutSmallFileRequestProto,
        ReadChunkRequestProto, WriteChunkRequestProto,
    };
    use ozone_proto::hdds::PipelineProto;
    use tempfile::tempdir;

    fn dispatcher(dir: &tempfile::TempDir) -> Dispatcher {
        Dispatcher::new(Arc::new(ContainerEngine::new(dir.path(), 1 << 30).unwrap()))
    }

    fn pipeline(container: &str) -> PipelineProto {
        PipelineProto {
            leader_id: uuid::Uuid::new_v4().to_string(),
            members: vec![],
            container_name: container.to_string(),
            replication_type: 0,
            replication_factor: 1,
        }
    }

    fn request(cmd_type: Type) -> ContainerCommandRequestProto {
        ContainerCommandRequestProto {
            cmd_type: cmd_type as i32,
            trace_id: "trace-1".to_string(),
            ..Default::default()
        }
    }

    fn create_container(dispatcher: &Dispatcher, name: &str) {
        let mut req = request(Type::CreateContainer);
        req.create_container = Some(CreateContainerRequestProto {
            pipeline: Some(pipeline(name)),
            container_data: Some(ContainerData {
                name: name.to_string(),
                metadata: vec![],
                bytes_used: 0,
                key_count: 0,
                open: true,
            }),
        });
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.result, ContainerResult::Success as i32);
    }

    #[test]
    fn test_create_then_duplicate() {
        let dir = tempdir().unwrap();
        let dispatcher = dispatcher(&dir);

        create_container(&dispatcher, "c1");

        let mut req = request(Type::CreateContainer);
        req.create_container = Some(CreateContainerRequestProto {
            pipeline: Some(pipeline("c1")),
            container_data: Some(ContainerData {
                name: "c1".to_string(),
                metadata: vec![],
                bytes_used: 0,
                key_count: 0,
                open: true,
            }),
        });
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.result, ContainerResult::ContainerExists as i32);
        assert_eq!(resp.trace_id, "trace-1");
        assert_eq!(dispatcher.metrics().ops(Type::CreateContainer), 2);
        assert_eq!(dispatcher.metrics().failures(Type::CreateContainer), 1);
    }

    #[test]
    fn test_malformed_request() {
        let dir = tempdir().unwrap();
        let dispatcher = dispatcher(&dir);
        let resp = dispatcher.dispatch(request(Type::WriteChunk));
        assert_eq!(resp.result, ContainerResult::MalformedRequest as i32);
    }

    #[test]
    fn test_chunk_write_read_through_dispatcher() {
        let dir = tempdir().unwrap();
        let dispatcher = dispatcher(&dir);
        create_container(&dispatcher, "c1");

        let payload = vec![0xCDu8; 512];
        let chunk = ChunkInfo {
            chunk_name: "k1_chunk_0".to_string(),
            offset: 0,
            len: 512,
            checksum: chunk_checksum(&payload),
            metadata: vec![],
        };

        let mut req = request(Type::WriteChunk);
        req.write_chunk = Some(WriteChunkRequestProto {
            pipeline: Some(pipeline("c1")),
            key_name: "k1".to_string(),
            chunk_data: Some(chunk.clone()),
            data: payload.clone(),
        });
        assert_eq!(
            dispatcher.dispatch(req).result,
            ContainerResult::Success as i32
        );

        let mut req = request(Type::ReadChunk);
        req.read_chunk = Some(ReadChunkRequestProto {
            pipeline: Some(pipeline("c1")),
            key_name: "k1".to_string(),
            chunk_data: Some(chunk),
        });
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.result, ContainerResult::Success as i32);
        assert_eq!(resp.read_chunk.unwrap().data, payload);
    }

    #[test]
    fn test_get_missing_key() {
        let dir = tempdir().unwrap();
        let dispatcher = dispatcher(&dir);
        create_container(&dispatcher, "c1");

        let mut req = request(Type::GetKey);
        req.get_key = Some(GetKeyRequestProto {
            pipeline: Some(pipeline("c1")),
            key_data: Some(KeyData {
                container_name: "c1".to_string(),
                name: "missing".to_string(),
                metadata: vec![],
                chunks: vec![],
            }),
        });
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.result, ContainerResult::KeyNotFound as i32);
    }

    #[test]
    fn test_small_file_round_trip() {
        let dir = tempdir().unwrap();
        let dispatcher = dispatcher(&dir);
        create_container(&dispatcher, "c1");

        let payload = b"small file payload".to_vec();
        let chunk = ChunkInfo {
            chunk_name: "k1_chunk_0".to_string(),
            offset: 0,
            len: payload.len() as u64,
            checksum: chunk_checksum(&payload),
            metadata: vec![],
        };
        let key_data = KeyData {
            container_name: "c1".to_string(),
            name: "k1".to_string(),
            metadata: vec![],
            chunks: vec![],
        };

        let mut req = request(Type::PutSmallFile);
        req.put_small_file = Some(PutSmallFileRequestProto {
            key: Some(PutKeyRequestProto {
                pipeline: Some(pipeline("c1")),
                key_data: Some(key_data.clone()),
            }),
            chunk_info: Some(chunk),
            data: payload.clone(),
        });
        assert_eq!(
            dispatcher.dispatch(req).result,
            ContainerResult::Success as i32
        );

        let mut req = request(Type::GetSmallFile);
        req.get_small_file = Some(GetSmallFileRequestProto {
            key: Some(GetKeyRequestProto {
                pipeline: Some(pipeline("c1")),
                key_data: Some(key_data),
            }),
        });
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.result, ContainerResult::Success as i32);
        assert_eq!(resp.get_small_file.unwrap().data.unwrap().data, payload);
    }
}
