use std::sync::Arc;

use anyhow::Result;

use crate::error::LifecycleError;
use crate::fixtures::RecordingFactory;
use crate::models::{Message, ParticipantId, PartitionId, ResourceId, SessionId, StateModelDefId, StateModelDefinition};
use crate::participant::{StateMachineEngine, TransitionOutcome};

fn transition(from: &str, to: &str) -> Message {
    Message::state_transition(
        "controller",
        ParticipantId::new("p0"),
        SessionId::new("s0"),
        ResourceId::new("db"),
        PartitionId::new("db_0"),
        StateModelDefId::new("MasterSlave"),
        from,
        to,
    )
}

#[test]
fn duplicate_factories_are_rejected() -> Result<()> {
    let mut engine = StateMachineEngine::new();
    let name = StateModelDefId::new("MasterSlave");

    engine.register_state_model_factory(name.clone(), Arc::new(RecordingFactory::default()))?;
    let res = engine.register_state_model_factory(name.clone(), Arc::new(RecordingFactory::default()));

    assert!(matches!(res, Err(LifecycleError::DuplicateFactory(_))), "expected duplicate factory error, got {:?}", res);
    assert!(engine.has_factory(&name), "expected first factory to remain registered");
    Ok(())
}

#[test]
fn registration_after_seal_is_rejected() {
    let mut engine = StateMachineEngine::new();
    engine.seal();

    let res = engine.register_state_model_factory(StateModelDefId::new("OnlineOffline"), Arc::new(RecordingFactory::default()));

    assert!(matches!(res, Err(LifecycleError::RegistrationAfterConnect(_))), "expected registration after seal to fail, got {:?}", res);
}

#[test]
fn legal_transitions_are_applied_by_handlers() -> Result<()> {
    let (mut engine, factory) = (StateMachineEngine::new(), RecordingFactory::default());
    engine.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(factory.clone()))?;
    let def = StateModelDefinition::master_slave();

    let first = engine.execute(&def, &transition("OFFLINE", "SLAVE"), "OFFLINE");
    let second = engine.execute(&def, &transition("SLAVE", "MASTER"), "SLAVE");

    assert_eq!(first, TransitionOutcome::Applied("SLAVE".into()), "expected first transition to apply");
    assert_eq!(second, TransitionOutcome::Applied("MASTER".into()), "expected second transition to apply");
    assert_eq!(
        factory.recorded(),
        vec![("db_0".into(), "OFFLINE".into(), "SLAVE".into()), ("db_0".into(), "SLAVE".into(), "MASTER".into())],
        "expected handler to observe both transitions in order",
    );
    Ok(())
}

#[test]
fn undeclared_transitions_error_without_invoking_handlers() -> Result<()> {
    let (mut engine, factory) = (StateMachineEngine::new(), RecordingFactory::default());
    engine.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(factory.clone()))?;

    let outcome = engine.execute(&StateModelDefinition::master_slave(), &transition("OFFLINE", "MASTER"), "OFFLINE");

    assert_eq!(outcome, TransitionOutcome::Errored, "expected undeclared transition to error");
    assert_eq!(outcome.new_state(), Some("ERROR"), "expected errored replica to be in ERROR");
    assert!(factory.recorded().is_empty(), "expected handler not to be invoked");
    Ok(())
}

#[test]
fn stale_messages_are_discarded() -> Result<()> {
    let (mut engine, factory) = (StateMachineEngine::new(), RecordingFactory::default());
    engine.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(factory.clone()))?;

    let outcome = engine.execute(&StateModelDefinition::master_slave(), &transition("SLAVE", "MASTER"), "OFFLINE");

    assert_eq!(outcome, TransitionOutcome::Stale { current: "OFFLINE".into() }, "expected mismatched from state to be stale");
    assert_eq!(outcome.new_state(), None, "expected stale message to leave the replica untouched");
    assert!(factory.recorded().is_empty(), "expected handler not to be invoked");
    Ok(())
}

#[test]
fn handler_failures_and_missing_factories_error() -> Result<()> {
    let mut engine = StateMachineEngine::new();
    engine.register_state_model_factory(StateModelDefId::new("MasterSlave"), Arc::new(RecordingFactory::failing_on("SLAVE")))?;

    let failed = engine.execute(&StateModelDefinition::master_slave(), &transition("OFFLINE", "SLAVE"), "OFFLINE");
    let unregistered = engine.execute(&StateModelDefinition::online_offline(), &transition("OFFLINE", "ONLINE"), "OFFLINE");

    assert_eq!(failed, TransitionOutcome::Errored, "expected handler failure to error");
    assert_eq!(unregistered, TransitionOutcome::Errored, "expected transition without factory to error");
    Ok(())
}
