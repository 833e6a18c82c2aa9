use std::sync::Arc;

use anyhow::{Context, Result};

use crate::accessor::ClusterAccessor;
use crate::error::LifecycleError;
use crate::fixtures::{self, RecordingFactory};
use crate::models::{ClusterConfigDelta, ClusterId, Message, ParticipantConfig, ParticipantId, PartitionId, ResourceId, SessionId, StateModelDefId};
use crate::participant::ParticipantConnection;
use crate::store::{PathBuilder, SledStore, StoreHandle};

fn connection(store: &StoreHandle, participant: &str) -> ParticipantConnection {
    ParticipantConnection::new(ClusterId::new("c0"), ParticipantId::new(participant), store.clone(), "localhost", 12000)
}

fn transition(session: &SessionId, partition: &str, from: &str, to: &str) -> Message {
    Message::state_transition(
        "controller",
        ParticipantId::new("p0"),
        session.clone(),
        ResourceId::new("db"),
        PartitionId::new(partition),
        StateModelDefId::new("MasterSlave"),
        from,
        to,
    )
}

fn replica_state(accessor: &ClusterAccessor, partition: &str) -> Result<Option<String>> {
    let participant = accessor.read_participant(&ParticipantId::new("p0"))?.context("expected participant")?;
    Ok(participant.current_states.get(&ResourceId::new("db")).and_then(|state| state.partition_states.get(&PartitionId::new(partition)).cloned()))
}

#[test]
fn connect_requires_cluster_structure() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    let mut conn = connection(&store, "p0").auto_join(true);

    let res = conn.connect();

    assert!(matches!(res, Err(LifecycleError::ConnectionRefused(_))), "expected connection to missing cluster to be refused, got {:?}", res);
    assert!(!conn.is_connected(), "expected connection to remain disconnected");
    Ok(())
}

#[test]
fn auto_join_requires_both_participant_and_cluster_consent() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    let mut accessor = ClusterAccessor::new(ClusterId::new("c0"), store.clone());
    accessor.create_cluster(&fixtures::cluster_config("c0"))?;

    let res = connection(&store, "p0").connect();
    assert!(matches!(res, Err(LifecycleError::ConnectionRefused(_))), "expected unknown participant to be refused, got {:?}", res);
    let res = connection(&store, "p0").auto_join(true).connect();
    assert!(matches!(res, Err(LifecycleError::ConnectionRefused(_))), "expected auto join to be refused by cluster, got {:?}", res);

    accessor.update_cluster(&ClusterConfigDelta::default().set_auto_join_allowed(true))?;
    let mut conn = connection(&store, "p0").auto_join(true);
    let session = conn.connect().context("expected auto join to succeed once allowed")?;

    let participant = accessor.read_participant(&ParticipantId::new("p0"))?.context("expected participant to have joined")?;
    assert_eq!(participant.session_id(), Some(&session), "expected live instance for the new session");
    assert_eq!(participant.config.host_name, "localhost", "expected config to be created from the connection");
    Ok(())
}

#[test]
fn connect_is_idempotent_and_exclusive() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    accessor.add_participant(&ParticipantConfig::new(ParticipantId::new("p0"), "localhost", 12000))?;
    let mut conn = connection(&store, "p0");

    let first = conn.connect()?;
    let second = conn.connect()?;
    let res = connection(&store, "p0").connect();

    assert_eq!(first, second, "expected reconnect to keep the live session");
    assert!(matches!(res, Err(LifecycleError::AlreadyLive(_))), "expected second connection to be rejected, got {:?}", res);
    let res = conn.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(RecordingFactory::default()));
    assert!(matches!(res, Err(LifecycleError::RegistrationAfterConnect(_))), "expected registration after connect to fail, got {:?}", res);
    Ok(())
}

#[test]
fn messages_drive_session_scoped_current_state() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ParticipantId::new("p0");
    accessor.add_participant(&ParticipantConfig::new(id.clone(), "localhost", 12000))?;
    let factory = RecordingFactory::default();
    let mut conn = connection(&store, "p0");
    conn.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(factory.clone()))?;
    let session = conn.connect()?;
    let participants = accessor.participant_accessor();

    participants.insert_messages(&id, &[transition(&session, "db_0", "OFFLINE", "SLAVE"), transition(&SessionId::new("old"), "db_1", "OFFLINE", "SLAVE")])?;
    let processed = conn.process_messages()?;
    assert_eq!(processed, 2, "expected both messages to be consumed");
    participants.insert_messages(&id, &[transition(&session, "db_0", "SLAVE", "MASTER")])?;
    conn.process_messages()?;

    assert_eq!(replica_state(&accessor, "db_0")?.as_deref(), Some("MASTER"), "expected replica to have been promoted");
    assert_eq!(replica_state(&accessor, "db_1")?, None, "expected message for another session to be ignored");
    assert_eq!(factory.recorded().len(), 2, "expected two transitions to reach the handler");
    let paths = PathBuilder::new(&ClusterId::new("c0"));
    assert!(store.list_children(&paths.messages(&id))?.is_empty(), "expected message queue to be drained");
    Ok(())
}

#[test]
fn failed_transitions_put_replicas_in_error() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ParticipantId::new("p0");
    accessor.add_participant(&ParticipantConfig::new(id.clone(), "localhost", 12000))?;
    let mut conn = connection(&store, "p0");
    conn.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(RecordingFactory::failing_on("SLAVE")))?;
    let session = conn.connect()?;

    accessor.participant_accessor().insert_messages(
        &id,
        &[transition(&session, "db_0", "OFFLINE", "SLAVE"), transition(&session, "db_1", "OFFLINE", "MASTER")],
    )?;
    conn.process_messages()?;

    assert_eq!(replica_state(&accessor, "db_0")?.as_deref(), Some("ERROR"), "expected handler failure to put replica in ERROR");
    assert_eq!(replica_state(&accessor, "db_1")?.as_deref(), Some("ERROR"), "expected undeclared transition to put replica in ERROR");
    Ok(())
}

#[test]
fn disconnect_expires_the_session() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ParticipantId::new("p0");
    accessor.add_participant(&ParticipantConfig::new(id.clone(), "localhost", 12000))?;
    let mut conn = connection(&store, "p0");
    conn.connect()?;

    conn.disconnect()?;
    conn.disconnect().context("expected second disconnect to be a no-op")?;

    let participant = accessor.read_participant(&id)?.context("expected participant")?;
    assert!(!participant.is_alive(), "expected live instance to be gone");
    assert!(matches!(conn.process_messages(), Err(LifecycleError::NotConnected)), "expected processing to require a session");
    accessor.drop_participant(&id).context("expected disconnected participant to be droppable")?;
    Ok(())
}

#[test]
fn sessions_of_a_dead_process_are_expired_when_the_store_reopens() -> Result<()> {
    let tmpdir = tempfile::tempdir_in("/tmp")?;
    let id = ParticipantId::new("p0");
    {
        let db = Arc::new(SledStore::open(tmpdir.path())?);
        let store: StoreHandle = db.clone();
        let accessor = ClusterAccessor::new(ClusterId::new("c0"), store.clone());
        accessor.create_cluster(&fixtures::cluster_config("c0"))?;
        accessor.add_participant(&ParticipantConfig::new(id.clone(), "localhost", 12000))?;
        connection(&store, "p0").connect()?;
        db.flush()?;
    }

    let store: StoreHandle = Arc::new(SledStore::open(tmpdir.path())?);
    let accessor = ClusterAccessor::new(ClusterId::new("c0"), store.clone());
    let participant = accessor.read_participant(&id)?.context("expected participant")?;
    assert!(!participant.is_alive(), "expected live instance of the dead process to be gone");

    let mut conn = connection(&store, "p0");
    conn.connect().context("expected participant to reconnect after restart")?;
    conn.disconnect()?;
    accessor.drop_cluster().context("expected cluster to be droppable once no participant is live")?;
    Ok(())
}
