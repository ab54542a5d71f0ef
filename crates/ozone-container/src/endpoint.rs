//! Per-SCM-endpoint state machine.
//!
//! Each datanode runs one of these per SCM endpoint, walking
//! GETVERSION -> REGISTER -> HEARTBEAT and escalating back to REGISTER after
//! too many missed heartbeats. Every tick runs under the endpoint lock so
//! state reads and result delivery are serialized.

use crate::engine::ContainerEngine;
use async_trait::async_trait;
use ozone_common::{DatanodeDetails, Error, Result};
use ozone_proto::datanode::{
    ContainerReportProto, ContainerReportsProto, ScmCommandProto, ScmHeartbeatRequestProto,
    ScmNodeReport, ScmRegisterRequestProto, ScmRegisteredResponseProto, ScmStorageReport,
    ScmVersionRequestProto, ScmVersionResponseProto,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The SCM side of the endpoint, kept as a trait so the machine can be
/// driven against a fake in tests.
#[async_trait]
pub trait ScmConnection: Send + Sync {
    async fn get_version(&self, request: ScmVersionRequestProto)
        -> Result<ScmVersionResponseProto>;

    async fn register(
        &self,
        request: ScmRegisterRequestProto,
    ) -> Result<ScmRegisteredResponseProto>;

    async fn send_heartbeat(
        &self,
        request: ScmHeartbeatRequestProto,
    ) -> Result<ozone_proto::datanode::ScmHeartbeatResponseProto>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointState {
    GetVersion,
    Register,
    Heartbeat,
    Shutdown,
}

impl EndpointState {
    /// The state entered after the current state's task succeeds.
    pub fn next(self) -> EndpointState {
        match self {
            Self::GetVersion => Self::Register,
            Self::Register => Self::Heartbeat,
            Self::Heartbeat => Self::Heartbeat,
            Self::Shutdown => Self::Shutdown,
        }
    }
}

struct EndpointInner {
    state: EndpointState,
    missed_count: u32,
    details: DatanodeDetails,
}

pub struct EndpointStateMachine {
    conn: Arc<dyn ScmConnection>,
    engine: Arc<ContainerEngine>,
    inner: Mutex<EndpointInner>,
    commands: parking_lot::Mutex<VecDeque<ScmCommandProto>>,
    stopped: AtomicBool,
    heartbeat_interval: Duration,
    max_misses: u32,
}

impl EndpointStateMachine {
    pub fn new(
        conn: Arc<dyn ScmConnection>,
        engine: Arc<ContainerEngine>,
        details: DatanodeDetails,
        heartbeat_interval: Duration,
        max_misses: u32,
    ) -> Self {
        Self {
            conn,
            engine,
            inner: Mutex::new(EndpointInner {
                state: EndpointState::GetVersion,
                missed_count: 0,
                details,
            }),
            commands: parking_lot::Mutex::new(VecDeque::new()),
            stopped: AtomicBool::new(false),
            heartbeat_interval,
            max_misses,
        }
    }

    pub async fn state(&self) -> EndpointState {
        self.inner.lock().await.state
    }

    pub async fn datanode_details(&self) -> DatanodeDetails {
        self.inner.lock().await.details.clone()
    }

    /// Commands received from SCM and not yet processed.
    pub fn take_commands(&self) -> Vec<ScmCommandProto> {
        self.commands.lock().drain(..).collect()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    fn node_report(&self) -> ScmNodeReport {
        let stat = self.engine.node_stat();
        ScmNodeReport {
            storage_report: vec![ScmStorageReport {
                storage_uuid: Uuid::new_v4().to_string(),
                capacity: stat.capacity,
                scm_used: stat.used,
                remaining: stat.remaining,
            }],
        }
    }

    fn container_report(&self) -> ContainerReportsProto {
        ContainerReportsProto {
            reports: self
                .engine
                .container_report()
                .into_iter()
                .map(|(name, used_bytes, key_count)| ContainerReportProto {
                    container_name: name,
                    used_bytes,
                    key_count,
                })
                .collect(),
        }
    }

    /// Run one task of the state machine under the endpoint lock.
    pub async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            EndpointState::GetVersion => self.get_version_task(&mut inner).await,
            EndpointState::Register => self.register_task(&mut inner).await,
            EndpointState::Heartbeat => self.heartbeat_task(&mut inner).await,
            EndpointState::Shutdown => {}
        }
    }

    async fn get_version_task(&self, inner: &mut EndpointInner) {
        match self.conn.get_version(ScmVersionRequestProto {}).await {
            Ok(version) => {
                info!(
                    version = version.software_version,
                    scm = %version.scm_uuid,
                    "negotiated SCM version"
                );
                inner.state = inner.state.next();
            }
            Err(err) => self.log_missed(inner, &err),
        }
    }

    async fn register_task(&self, inner: &mut EndpointInner) {
        let request = ScmRegisterRequestProto {
            datanode_details: Some(inner.details.to_proto()),
            node_report: Some(self.node_report()),
            container_report: Some(self.container_report()),
        };
        match self.conn.register(request).await {
            Ok(response) => self.handle_registration(inner, response),
            Err(err) => self.log_missed(inner, &err),
        }
    }

    fn handle_registration(&self, inner: &mut EndpointInner, response: ScmRegisteredResponseProto) {
        // A UUID mismatch or blank cluster id is a fatal invariant: this
        // endpoint stops, the process keeps serving others.
        let matches_uuid = Uuid::parse_str(&response.datanode_uuid)
            .map(|uuid| uuid == inner.details.uuid)
            .unwrap_or(false);
        if !matches_uuid {
            error!(
                expected = %inner.details.uuid,
                got = %response.datanode_uuid,
                "unexpected datanode ID in registration response, shutting down endpoint"
            );
            inner.state = EndpointState::Shutdown;
            return;
        }
        if response.cluster_id.trim().is_empty() {
            error!("blank cluster ID in registration response, shutting down endpoint");
            inner.state = EndpointState::Shutdown;
            return;
        }
        if !response.hostname.is_empty() && !response.ip_address.is_empty() {
            inner.details.hostname = response.hostname;
            inner.details.ip_address = response.ip_address;
        }
        info!(cluster = %response.cluster_id, "registered with SCM");
        inner.state = inner.state.next();
        inner.missed_count = 0;
    }

    async fn heartbeat_task(&self, inner: &mut EndpointInner) {
        let request = ScmHeartbeatRequestProto {
            datanode_details: Some(inner.details.to_proto()),
            node_report: Some(self.node_report()),
        };
        let heartbeat = tokio::time::timeout(
            self.heartbeat_interval,
            self.conn.send_heartbeat(request),
        )
        .await
        .map_err(|_| Error::rpc("heartbeat deadline exceeded"))
        .and_then(|result| result);

        match heartbeat {
            Ok(response) => {
                inner.missed_count = 0;
                if !response.commands.is_empty() {
                    debug!(count = response.commands.len(), "queued SCM commands");
                    self.commands.lock().extend(response.commands);
                }
            }
            Err(err) => {
                self.log_missed(inner, &err);
                if inner.missed_count > self.max_misses {
                    warn!(
                        missed = inner.missed_count,
                        "too many missed heartbeats, falling back to registration"
                    );
                    inner.state = EndpointState::Register;
                }
            }
        }
    }

    fn log_missed(&self, inner: &mut EndpointInner, err: &Error) {
        inner.missed_count += 1;
        if inner.missed_count == 1 || inner.missed_count % 10 == 0 {
            warn!(
                missed = inner.missed_count,
                state = ?inner.state,
                %err,
                "SCM endpoint call failed"
            );
        }
    }

    /// Drive the machine until stopped or shut down.
    pub async fn run(&self) {
        while !self.is_stopped() {
            self.tick().await;
            if self.state().await == EndpointState::Shutdown {
                info!("endpoint state machine reached SHUTDOWN");
                break;
            }
            tokio::time::sleep(self.heartbeat_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ozone_proto::datanode::{scm_command_proto, ScmHeartbeatResponseProto};
    use parking_lot::Mutex as SyncMutex;
    use tempfile::tempdir;

    struct FakeScm {
        datanode_uuid: SyncMutex<String>,
        cluster_id: String,
        fail_heartbeats: SyncMutex<bool>,
        commands: SyncMutex<Vec<ScmCommandProto>>,
        registrations: SyncMutex<u32>,
    }

    impl FakeScm {
        fn new(uuid: Uuid) -> Self {
            Self {
                datanode_uuid: SyncMutex::new(uuid.to_string()),
                cluster_id: "cluster-1".to_string(),
                fail_heartbeats: SyncMutex::new(false),
                commands: SyncMutex::new(Vec::new()),
                registrations: SyncMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ScmConnection for FakeScm {
        async fn get_version(
            &self,
            _request: ScmVersionRequestProto,
        ) -> Result<ScmVersionResponseProto> {
            Ok(ScmVersionResponseProto {
                software_version: 1,
                scm_uuid: self.cluster_id.clone(),
            })
        }

        async fn register(
            &self,
            request: ScmRegisterRequestProto,
        ) -> Result<ScmRegisteredResponseProto> {
            *self.registrations.lock() += 1;
            let details = request.datanode_details.unwrap();
            Ok(ScmRegisteredResponseProto {
                error_code: 0,
                datanode_uuid: self.datanode_uuid.lock().clone(),
                cluster_id: self.cluster_id.clone(),
                hostname: details.hostname,
                ip_address: details.ip_address,
            })
        }

        async fn send_heartbeat(
            &self,
            _request: ScmHeartbeatRequestProto,
        ) -> Result<ScmHeartbeatResponseProto> {
            if *self.fail_heartbeats.lock() {
                return Err(Error::rpc("scm unreachable"));
            }
            Ok(ScmHeartbeatResponseProto {
                commands: self.commands.lock().drain(..).collect(),
            })
        }
    }

    fn machine(
        dir: &tempfile::TempDir,
        scm: Arc<FakeScm>,
        max_misses: u32,
    ) -> (EndpointStateMachine, Uuid) {
        let details = DatanodeDetails {
            uuid: Uuid::parse_str(&scm.datanode_uuid.lock()).unwrap(),
            hostname: "dn1".to_string(),
            ip_address: "127.0.0.1".to_string(),
            container_port: 9859,
        };
        let uuid = details.uuid;
        let engine = Arc::new(ContainerEngine::new(dir.path(), 1 << 30).unwrap());
        (
            EndpointStateMachine::new(
                scm,
                engine,
                details,
                Duration::from_millis(50),
                max_misses,
            ),
            uuid,
        )
    }

    #[tokio::test]
    async fn test_walks_to_heartbeat() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let scm = Arc::new(FakeScm::new(uuid));
        let (machine, _) = machine(&dir, Arc::clone(&scm), 3);

        assert_eq!(machine.state().await, EndpointState::GetVersion);
        machine.tick().await;
        assert_eq!(machine.state().await, EndpointState::Register);
        machine.tick().await;
        assert_eq!(machine.state().await, EndpointState::Heartbeat);
        machine.tick().await;
        assert_eq!(machine.state().await, EndpointState::Heartbeat);
        assert_eq!(*scm.registrations.lock(), 1);
    }

    #[tokio::test]
    async fn test_uuid_mismatch_shuts_down_endpoint() {
        let dir = tempdir().unwrap();
        let scm = Arc::new(FakeScm::new(Uuid::new_v4()));
        let (machine, _) = machine(&dir, Arc::clone(&scm), 3);

        // SCM starts echoing a different datanode ID back.
        *scm.datanode_uuid.lock() = Uuid::new_v4().to_string();
        machine.tick().await; // version
        machine.tick().await; // register -> shutdown
        assert_eq!(machine.state().await, EndpointState::Shutdown);
    }

    #[tokio::test]
    async fn test_missed_heartbeats_escalate_to_register() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let scm = Arc::new(FakeScm::new(uuid));
        let (machine, _) = machine(&dir, Arc::clone(&scm), 2);

        machine.tick().await;
        machine.tick().await;
        assert_eq!(machine.state().await, EndpointState::Heartbeat);

        *scm.fail_heartbeats.lock() = true;
        for _ in 0..2 {
            machine.tick().await;
            assert_eq!(machine.state().await, EndpointState::Heartbeat);
        }
        // The third consecutive miss crosses max_misses = 2.
        machine.tick().await;
        assert_eq!(machine.state().await, EndpointState::Register);

        // Recovery: registration succeeds again and heartbeats resume.
        *scm.fail_heartbeats.lock() = false;
        machine.tick().await;
        assert_eq!(machine.state().await, EndpointState::Heartbeat);
        assert_eq!(*scm.registrations.lock(), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_commands_are_queued() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let scm = Arc::new(FakeScm::new(uuid));
        scm.commands.lock().push(ScmCommandProto {
            command_type: scm_command_proto::Type::DeleteBlocksCommand as i32,
            registered_proto: None,
            delete_blocks_proto: None,
        });
        let (machine, _) = machine(&dir, scm, 3);

        machine.tick().await;
        machine.tick().await;
        machine.tick().await;

        let commands = machine.take_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].command_type,
            scm_command_proto::Type::DeleteBlocksCommand as i32
        );
        assert!(machine.take_commands().is_empty());
    }
}
