//! Ozone Protocol - gRPC service definitions
//!
//! This crate contains the protobuf-generated code for Ozone's
//! control-plane and data-plane protocols.

/// Shared messages (datanode identity, pipelines, replication settings)
pub mod hdds {
    tonic::include_proto!("ozone.hdds");
}

/// StorageContainerLocationProtocol (client <-> SCM)
pub mod scm {
    tonic::include_proto!("ozone.scm");
}

/// StorageContainerDatanodeProtocol (datanode <-> SCM)
pub mod datanode {
    tonic::include_proto!("ozone.datanode");
}

/// Container data-plane protocol (client <-> datanode)
pub mod container {
    tonic::include_proto!("ozone.container");
}

/// KeySpaceManagerProtocol (client <-> KSM)
pub mod ksm {
    tonic::include_proto!("ozone.ksm");
}
