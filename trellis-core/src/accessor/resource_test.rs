use anyhow::{Context, Result};

use crate::error::FailureReason;
use crate::fixtures;
use crate::models::{
    ClusterId, ProvisionerConfig, RebalanceMode, Record, ResourceConfig, ResourceId, ResourceType, StateModelDefId, StateModelDefinition,
};
use crate::store::PathBuilder;

#[test]
fn add_resource_requires_state_model() -> Result<()> {
    let (accessor, _store, _tmpdir) = fixtures::cluster("c0")?;
    let mut config = fixtures::resource_config("db", 4);
    if let Some(rebalancer) = config.rebalancer_config.as_mut() {
        rebalancer.state_model_def_id = StateModelDefId::new("OnlineOffline");
    }

    let res = accessor.add_resource(&config);
    assert_eq!(res.err().map(|err| err.reason()), Some(FailureReason::InvariantViolated), "expected missing state model to be rejected");

    accessor.add_state_model_definition(&StateModelDefinition::online_offline())?;
    accessor.add_resource(&config).context("expected resource to be added once its state model exists")?;
    Ok(())
}

#[test]
fn add_resource_requires_rebalancer_config() -> Result<()> {
    let (accessor, _store, _tmpdir) = fixtures::cluster("c0")?;
    let mut config = fixtures::resource_config("db", 1);
    config.rebalancer_config = None;

    let res = accessor.add_resource(&config);

    assert_eq!(res.err().map(|err| err.reason()), Some(FailureReason::InvariantViolated), "expected missing rebalancer config to be rejected");
    Ok(())
}

#[test]
fn add_resource_rejects_duplicates_and_invalid_structure() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    accessor.add_resource(&fixtures::resource_config("db", 1))?;

    let res = accessor.add_resource(&fixtures::resource_config("db", 1));
    assert_eq!(res.err().map(|err| err.reason()), Some(FailureReason::AlreadyExists), "expected duplicate resource to be rejected");

    store.remove(&PathBuilder::new(&ClusterId::new("c0")).external_views())?;
    let res = accessor.add_resource(&fixtures::resource_config("kv", 1));
    assert_eq!(res.err().map(|err| err.reason()), Some(FailureReason::InvariantViolated), "expected invalid structure to be rejected");
    Ok(())
}

#[test]
fn drop_resource_is_guarded_by_ideal_state() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ResourceId::new("db");
    accessor.add_resource(&fixtures::resource_config("db", 2))?;

    accessor.drop_resource(&id)?;
    let res = accessor.drop_resource(&id);

    assert_eq!(res.err().map(|err| err.reason()), Some(FailureReason::NotFound), "expected second drop to fail");
    let paths = PathBuilder::new(&ClusterId::new("c0"));
    let exists = store.exists(&[paths.ideal_state(&id), paths.resource_config(&id)])?;
    assert_eq!(exists, vec![false, false], "expected ideal state and configuration to be removed");
    Ok(())
}

#[test]
fn user_defined_resources_store_rebalancer_config_opaquely() -> Result<()> {
    let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let id = ResourceId::new("svc");
    let mut config = fixtures::resource_config("svc", 2);
    if let Some(rebalancer) = config.rebalancer_config.as_mut() {
        rebalancer.mode = RebalanceMode::UserDefined;
        rebalancer.rebalancer_class = Some("com.example.Rebalancer".into());
    }
    config.resource_type = ResourceType::Service;
    config.provisioner_config = Some(ProvisionerConfig { class_name: "local".into(), properties: Default::default() });
    let mut user_config = Record::new("svc");
    user_config.set_simple("tier", "gold");
    config.user_config = Some(user_config.clone());

    accessor.add_resource(&config)?;

    let paths = PathBuilder::new(&ClusterId::new("c0"));
    let exists = store.exists(&[paths.ideal_state(&id), paths.resource_config(&id)])?;
    assert_eq!(exists, vec![false, true], "expected only a configuration node for a user defined resource");
    let resource = accessor.read_resource(&id)?.context("expected resource to be readable")?;
    assert_eq!(resource.rebalancer_config().map(|conf| conf.mode), Some(RebalanceMode::UserDefined), "expected opaque rebalancer config");
    assert_eq!(resource.config.user_config, Some(user_config), "expected user config to be preserved");
    assert_eq!(resource.config.resource_type, ResourceType::Service, "expected resource type to be preserved");
    assert!(resource.config.provisioner_config.is_some(), "expected provisioner config to be preserved");

    accessor.drop_resource(&id).context("expected user defined resource to be droppable")?;
    Ok(())
}

#[test]
fn cached_reads_include_external_views_only_when_required() -> Result<()> {
    let (mut accessor, store, _tmpdir) = fixtures::cluster("c0")?;
    let paths = PathBuilder::new(&ClusterId::new("c0"));
    accessor.add_resource(&fixtures::resource_config("db", 1))?;
    store.set(&paths.external_view(&ResourceId::new("db")), Record::new("db"))?;

    let live = accessor.read_resources()?;
    let cached = accessor.read_cluster()?.resources;

    let db = ResourceId::new("db");
    assert!(live.get(&db).and_then(|res| res.external_view.as_ref()).is_some(), "expected uncached read to include the external view");
    assert!(cached.get(&db).and_then(|res| res.external_view.as_ref()).is_none(), "expected cached read to skip the external view");
    Ok(())
}

#[test]
fn resources_are_read_back_with_their_config() -> Result<()> {
    let (accessor, _store, _tmpdir) = fixtures::cluster("c0")?;
    let config: ResourceConfig = fixtures::resource_config("db", 3);
    accessor.add_resource(&config)?;

    let resources = accessor.read_resources()?;

    let resource = resources.get(&config.id).context("expected resource to be present")?;
    assert_eq!(resource.rebalancer_config().map(|conf| conf.mode), Some(RebalanceMode::SemiAuto), "expected mode to be preserved");
    assert!(resource.ideal_state.is_some(), "expected an ideal state");
    assert!(accessor.read_resource(&ResourceId::new("missing"))?.is_none(), "expected missing resource to read as none");
    Ok(())
}
