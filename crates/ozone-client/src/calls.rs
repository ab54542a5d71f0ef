//! Container protocol calls: request builders and response validation for
//! the data-plane commands.

use crate::xceiver::XceiverClient;
use ozone_common::checksum::chunk_checksum;
use ozone_common::{Error, Result};
use ozone_proto::container::{
    ChunkInfo, ContainerCommandRequestProto, ContainerCommandResponseProto, ContainerData,
    CreateContainerRequestProto, DeleteContainerRequestProto, DeleteKeyRequestProto,
    GetKeyRequestProto, GetSmallFileRequestProto, KeyData, PutKeyRequestProto,
    PutSmallFileRequestProto, ReadChunkRequestProto, ReadContainerRequestProto,
    Result as ContainerResult, Type, WriteChunkRequestProto,
};

fn request(cmd_type: Type, trace_id: &str) -> ContainerCommandRequestProto {
    ContainerCommandRequestProto {
        cmd_type: cmd_type as i32,
        trace_id: trace_id.to_string(),
        ..Default::default()
    }
}

/// Fail unless the envelope reports success.
fn validate(response: ContainerCommandResponseProto) -> Result<ContainerCommandResponseProto> {
    if response.result == ContainerResult::Success as i32 {
        Ok(response)
    } else {
        Err(Error::ContainerCommand {
            result: response.result,
            message: response.message,
        })
    }
}

pub async fn create_container(client: &XceiverClient, trace_id: &str) -> Result<()> {
    let pipeline = client.pipeline();
    let mut req = request(Type::CreateContainer, trace_id);
    req.create_container = Some(CreateContainerRequestProto {
        pipeline: Some(pipeline.to_proto()),
        container_data: Some(ContainerData {
            name: pipeline.container_name.clone(),
            metadata: vec![],
            bytes_used: 0,
            key_count: 0,
            open: true,
        }),
    });
    validate(client.send_command(req).await?)?;
    Ok(())
}

pub async fn read_container(client: &XceiverClient, trace_id: &str) -> Result<ContainerData> {
    let mut req = request(Type::ReadContainer, trace_id);
    req.read_container = Some(ReadContainerRequestProto {
        container_name: client.pipeline().container_name.clone(),
    });
    let resp = validate(client.send_command(req).await?)?;
    resp.read_container
        .and_then(|r| r.container_data)
        .ok_or_else(|| Error::rpc("readContainer response missing container data"))
}

pub async fn delete_container(client: &XceiverClient, trace_id: &str) -> Result<()> {
    let mut req = request(Type::DeleteContainer, trace_id);
    req.delete_container = Some(DeleteContainerRequestProto {
        container_name: client.pipeline().container_name.clone(),
    });
    validate(client.send_command(req).await?)?;
    Ok(())
}

pub async fn write_chunk(
    client: &XceiverClient,
    key_name: &str,
    chunk: ChunkInfo,
    data: Vec<u8>,
    trace_id: &str,
) -> Result<()> {
    let mut req = request(Type::WriteChunk, trace_id);
    req.write_chunk = Some(WriteChunkRequestProto {
        pipeline: Some(client.pipeline().to_proto()),
        key_name: key_name.to_string(),
        chunk_data: Some(chunk),
        data,
    });
    validate(client.send_command(req).await?)?;
    Ok(())
}

pub async fn read_chunk(
    client: &XceiverClient,
    key_name: &str,
    chunk: ChunkInfo,
    trace_id: &str,
) -> Result<Vec<u8>> {
    let mut req = request(Type::ReadChunk, trace_id);
    req.read_chunk = Some(ReadChunkRequestProto {
        pipeline: Some(client.pipeline().to_proto()),
        key_name: key_name.to_string(),
        chunk_data: Some(chunk),
    });
    let resp = validate(client.send_command(req).await?)?;
    resp.read_chunk
        .map(|r| r.data)
        .ok_or_else(|| Error::rpc("readChunk response missing data"))
}

pub async fn put_key(client: &XceiverClient, key_data: KeyData, trace_id: &str) -> Result<()> {
    let mut req = request(Type::PutKey, trace_id);
    req.put_key = Some(PutKeyRequestProto {
        pipeline: Some(client.pipeline().to_proto()),
        key_data: Some(key_data),
    });
    validate(client.send_command(req).await?)?;
    Ok(())
}

pub async fn get_key(client: &XceiverClient, key_name: &str, trace_id: &str) -> Result<KeyData> {
    let mut req = request(Type::GetKey, trace_id);
    req.get_key = Some(GetKeyRequestProto {
        pipeline: Some(client.pipeline().to_proto()),
        key_data: Some(KeyData {
            container_name: client.pipeline().container_name.clone(),
            name: key_name.to_string(),
            metadata: vec![],
            chunks: vec![],
        }),
    });
    let resp = validate(client.send_command(req).await?)?;
    resp.get_key
        .and_then(|r| r.key_data)
        .ok_or_else(|| Error::rpc("getKey response missing key data"))
}

pub async fn delete_key(client: &XceiverClient, key_name: &str, trace_id: &str) -> Result<()> {
    let mut req = request(Type::DeleteKey, trace_id);
    req.delete_key = Some(DeleteKeyRequestProto {
        pipeline: Some(client.pipeline().to_proto()),
        name: key_name.to_string(),
    });
    validate(client.send_command(req).await?)?;
    Ok(())
}

/// Write a whole key in one RPC: chunk payload plus key commit.
pub async fn put_small_file(
    client: &XceiverClient,
    key_name: &str,
    data: Vec<u8>,
    trace_id: &str,
) -> Result<()> {
    let chunk = ChunkInfo {
        chunk_name: format!("{key_name}_chunk_0"),
        offset: 0,
        len: data.len() as u64,
        checksum: chunk_checksum(&data),
        metadata: vec![],
    };
    let mut req = request(Type::PutSmallFile, trace_id);
    req.put_small_file = Some(PutSmallFileRequestProto {
        key: Some(PutKeyRequestProto {
            pipeline: Some(client.pipeline().to_proto()),
            key_data: Some(KeyData {
                container_name: client.pipeline().container_name.clone(),
                name: key_name.to_string(),
                metadata: vec![],
                chunks: vec![],
            }),
        }),
        chunk_info: Some(chunk),
        data,
    });
    validate(client.send_command(req).await?)?;
    Ok(())
}

/// Fetch a whole small key in one RPC.
pub async fn get_small_file(
    client: &XceiverClient,
    key_name: &str,
    trace_id: &str,
) -> Result<Vec<u8>> {
    let mut req = request(Type::GetSmallFile, trace_id);
    req.get_small_file = Some(GetSmallFileRequestProto {
        key: Some(GetKeyRequestProto {
            pipeline: Some(client.pipeline().to_proto()),
            key_data: Some(KeyData {
                container_name: client.pipeline().container_name.clone(),
                name: key_name.to_string(),
                metadata: vec![],
                chunks: vec![],
            }),
        }),
    });
    let resp = validate(client.send_command(req).await?)?;
    resp.get_small_file
        .and_then(|r| r.data)
        .map(|r| r.data)
        .ok_or_else(|| Error::rpc("getSmallFile response missing data"))
}
