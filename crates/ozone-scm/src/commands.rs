//! Commands SCM hands to datanodes on heartbeat.

use ozone_proto::datanode::{
    scm_command_proto, DeletedBlocksTransaction as DeletedBlocksTransactionProto,
    ScmCommandProto, ScmDeleteBlocksCmdProto,
};

/// A block-deletion work item recorded in the deleted-blocks log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletedBlocksTransaction {
    pub tx_id: i64,
    pub container_name: String,
    pub blocks: Vec<String>,
    /// How many times this transaction has been handed to a datanode.
    pub count: i32,
}

impl DeletedBlocksTransaction {
    pub fn to_proto(&self) -> DeletedBlocksTransactionProto {
        DeletedBlocksTransactionProto {
            tx_id: self.tx_id,
            container_name: self.container_name.clone(),
            blocks: self.blocks.clone(),
            count: self.count,
        }
    }
}

/// A command queued for a datanode, discriminated the same way as the wire
/// `SCMCommandProto.Type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScmCommand {
    /// Instructs the datanode to run its registration flow again.
    ReRegister,
    /// Carries batches of block-deletion transactions.
    DeleteBlocks(Vec<DeletedBlocksTransaction>),
}

impl ScmCommand {
    pub fn command_type(&self) -> scm_command_proto::Type {
        match self {
            Self::ReRegister => scm_command_proto::Type::RegisteredCommand,
            Self::DeleteBlocks(_) => scm_command_proto::Type::DeleteBlocksCommand,
        }
    }

    pub fn to_proto(&self) -> ScmCommandProto {
        match self {
            Self::ReRegister => ScmCommandProto {
                command_type: scm_command_proto::Type::RegisteredCommand as i32,
                registered_proto: None,
                delete_blocks_proto: None,
            },
            Self::DeleteBlocks(txs) => ScmCommandProto {
                command_type: scm_command_proto::Type::DeleteBlocksCommand as i32,
                registered_proto: None,
                delete_blocks_proto: Some(ScmDeleteBlocksCmdProto {
                    deleted_blocks_transactions: txs.iter().map(|t| t.to_proto()).collect(),
                }),
            },
        }
    }
}
