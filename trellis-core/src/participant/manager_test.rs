use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::fixtures::{self, PanickingFactory, RecordingFactory};
use crate::models::{ClusterId, Message, ParticipantConfig, ParticipantId, PartitionId, ResourceId, StateModelDefId};
use crate::participant::{LifecycleState, ParticipantConnection, ParticipantManager, ParticipantManagerConfig};
use crate::store::StoreHandle;

fn manager(store: &StoreHandle) -> ParticipantManager {
    let conn = ParticipantConnection::new(ClusterId::new("c0"), ParticipantId::new("p0"), store.clone(), "localhost", 12000);
    ParticipantManager::new(conn, ParticipantManagerConfig { poll_interval: Duration::from_millis(10) })
}

#[tokio::test]
async fn sync_start_and_stop_return_when_connect_fails() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    let mut manager = manager(&store);

    let started = tokio::time::timeout(Duration::from_secs(5), manager.sync_start()).await.context("sync_start hung")?;
    let stopped = tokio::time::timeout(Duration::from_secs(5), manager.sync_stop()).await.context("sync_stop hung")?;

    assert_eq!(started, LifecycleState::Disconnected, "expected failed startup to end disconnected");
    assert_eq!(stopped, LifecycleState::Disconnected, "expected stop after failed startup to report disconnected");
    Ok(())
}

#[tokio::test]
async fn sync_stop_without_start_returns_immediately() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    let mut manager = manager(&store);

    let state = tokio::time::timeout(Duration::from_secs(1), manager.sync_stop()).await.context("sync_stop hung")?;

    assert_eq!(state, LifecycleState::Idle, "expected unstarted manager to remain idle");
    Ok(())
}

#[tokio::test]
async fn duplicate_factories_fail_startup_and_release_the_caller() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ParticipantId::new("p0");
    accessor.add_participant(&ParticipantConfig::new(id.clone(), "localhost", 12000))?;
    let mut manager = manager(&store);
    manager.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(RecordingFactory::default()))?;
    manager.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(RecordingFactory::default()))?;

    let started = tokio::time::timeout(Duration::from_secs(5), manager.sync_start()).await.context("sync_start hung")?;

    assert_eq!(started, LifecycleState::Disconnected, "expected duplicate registration to fail startup");
    let participant = accessor.read_participant(&id)?.context("expected participant")?;
    assert!(!participant.is_alive(), "expected participant never to go live");
    manager.sync_stop().await;
    Ok(())
}

#[tokio::test]
async fn connected_lifecycle_processes_messages_until_stopped() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ParticipantId::new("p0");
    accessor.add_participant(&ParticipantConfig::new(id.clone(), "localhost", 12000))?;
    let factory = RecordingFactory::default();
    let mut manager = manager(&store);
    manager.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(factory.clone()))?;

    let started = manager.sync_start().await;
    assert_eq!(started, LifecycleState::Connected, "expected participant to connect");
    assert_eq!(manager.sync_start().await, LifecycleState::Connected, "expected second start to be a no-op");
    let res = manager.register_state_model_factory(StateModelDefId::new("OnlineOffline"), Arc::new(RecordingFactory::default()));
    assert!(res.is_err(), "expected registration after start to fail");

    let session = accessor.read_participant(&id)?.and_then(|p| p.session_id().cloned()).context("expected live session")?;
    let msg = Message::state_transition(
        "controller",
        id.clone(),
        session,
        ResourceId::new("db"),
        PartitionId::new("db_0"),
        StateModelDefId::new("MasterSlave"),
        "OFFLINE",
        "SLAVE",
    );
    accessor.participant_accessor().insert_messages(&id, &[msg])?;
    let mut attempts = 0;
    while factory.recorded().is_empty() {
        attempts += 1;
        if attempts > 200 {
            bail!("message was never processed");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stopped = tokio::time::timeout(Duration::from_secs(5), manager.sync_stop()).await.context("sync_stop hung")?;
    assert_eq!(stopped, LifecycleState::Disconnected, "expected lifecycle to end disconnected");
    assert_eq!(factory.recorded(), vec![("db_0".into(), "OFFLINE".into(), "SLAVE".into())], "expected the transition to be handled once");
    let participant = accessor.read_participant(&id)?.context("expected participant")?;
    assert!(!participant.is_alive(), "expected live instance to be removed on stop");
    assert_eq!(manager.sync_stop().await, LifecycleState::Disconnected, "expected second stop to be a no-op");
    Ok(())
}

#[tokio::test]
async fn sync_stop_returns_after_a_fault_while_connected() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ParticipantId::new("p0");
    accessor.add_participant(&ParticipantConfig::new(id.clone(), "localhost", 12000))?;
    let mut manager = manager(&store);
    manager.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(PanickingFactory))?;
    assert_eq!(manager.sync_start().await, LifecycleState::Connected, "expected participant to connect");

    let session = accessor.read_participant(&id)?.and_then(|p| p.session_id().cloned()).context("expected live session")?;
    let msg = Message::state_transition(
        "controller",
        id.clone(),
        session,
        ResourceId::new("db"),
        PartitionId::new("db_0"),
        StateModelDefId::new("MasterSlave"),
        "OFFLINE",
        "SLAVE",
    );
    accessor.participant_accessor().insert_messages(&id, &[msg])?;
    let mut attempts = 0;
    while manager.state() != LifecycleState::Disconnected {
        attempts += 1;
        if attempts > 200 {
            bail!("lifecycle never faulted");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stopped = tokio::time::timeout(Duration::from_secs(5), manager.sync_stop()).await.context("sync_stop hung after fault")?;
    assert_eq!(stopped, LifecycleState::Disconnected, "expected faulted lifecycle to end disconnected");
    let participant = accessor.read_participant(&id)?.context("expected participant")?;
    assert!(!participant.is_alive(), "expected live instance to be removed after fault");
    Ok(())
}
