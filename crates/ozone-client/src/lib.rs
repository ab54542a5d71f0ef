//! Ozone container client.
//!
//! The data-plane path used by everything that reads or writes keys: a
//! pooled connection per pipeline leader, chunk-granular streams on top of
//! it, and the RPC clients for SCM's location protocol.

pub mod calls;
pub mod chunk_input_stream;
pub mod chunk_output_stream;
pub mod location;
pub mod manager;
pub mod storage_client;
pub mod xceiver;

pub use chunk_input_stream::ChunkInputStream;
pub use chunk_output_stream::ChunkOutputStream;
pub use location::StorageContainerLocationClient;
pub use manager::XceiverClientManager;
pub use storage_client::ContainerOperationClient;
pub use xceiver::{XceiverClient, XceiverClientMetrics};
