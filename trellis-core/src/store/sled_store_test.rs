use anyhow::Result;

use super::{Durability, HierarchicalStore, SledStore, StoreError};
use crate::fixtures;
use crate::models::{Record, SessionId};

#[test]
fn create_builds_parents_and_rejects_duplicates() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;

    let created = store.create("/c0/INSTANCES/p0", Some(Record::new("p0")), Durability::Persistent)?;
    let dup = store.create("/c0/INSTANCES/p0", None, Durability::Persistent)?;

    assert!(created, "expected first create to succeed");
    assert!(!dup, "expected second create of the same path to report false");
    let exists = store.exists(&["/c0".into(), "/c0/INSTANCES".into(), "/c0/LIVEINSTANCES".into()])?;
    assert_eq!(exists, vec![true, true, false], "expected parents to be created on demand");
    assert_eq!(store.get("/c0/INSTANCES")?, None, "expected parent nodes to hold no record");
    Ok(())
}

#[test]
fn update_increments_version_and_respects_declined_mutations() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    store.create("/c0/node", Some(Record::new("node")), Durability::Persistent)?;

    let applied = store.update("/c0/node", &|rec| {
        let mut rec = rec.unwrap_or_default();
        rec.set_simple("k", "v");
        Some(rec)
    })?;
    let declined = store.update("/c0/node", &|_| None)?;

    assert!(applied, "expected update to apply");
    assert!(!declined, "expected declined update to report false");
    let stat = store.stat("/c0/node")?.ok_or_else(|| anyhow::anyhow!("expected node stat"))?;
    assert_eq!(stat.version, 1, "expected version 1 after one applied update, got {}", stat.version);
    let rec = store.get("/c0/node")?.unwrap_or_default();
    assert_eq!(rec.simple("k"), Some("v"), "expected updated field to be present");
    Ok(())
}

#[test]
fn remove_is_recursive_and_leaves_siblings() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    store.create("/c0/a/x/y", None, Durability::Persistent)?;
    store.create("/c0/ab", None, Durability::Persistent)?;

    let removed = store.remove("/c0/a")?;
    let removed_again = store.remove("/c0/a")?;

    assert!(removed, "expected first remove to succeed");
    assert!(!removed_again, "expected second remove to report false");
    let exists = store.exists(&["/c0/a".into(), "/c0/a/x/y".into(), "/c0/ab".into()])?;
    assert_eq!(exists, vec![false, false, true], "expected only the removed subtree to be gone");
    Ok(())
}

#[test]
fn children_are_listed_one_level_deep() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    store.create("/c0/IDEALSTATES/db", Some(Record::new("db")), Durability::Persistent)?;
    store.create("/c0/IDEALSTATES/kv", None, Durability::Persistent)?;
    store.create("/c0/IDEALSTATES/kv/deep", Some(Record::new("deep")), Durability::Persistent)?;

    let children = store.list_children("/c0/IDEALSTATES")?;
    let values = store.get_child_values("/c0/IDEALSTATES")?;

    assert_eq!(children, vec!["db".to_string(), "kv".to_string()], "unexpected children {:?}", children);
    assert_eq!(values.keys().collect::<Vec<_>>(), vec!["db"], "expected only children holding a record, got {:?}", values);
    Ok(())
}

#[test]
fn expired_sessions_lose_their_ephemeral_nodes() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    let (s0, s1) = (SessionId::generate(), SessionId::generate());
    store.create("/c0/LIVEINSTANCES/p0", Some(Record::new("p0")), Durability::Ephemeral(s0.clone()))?;
    store.create("/c0/LIVEINSTANCES/p1", Some(Record::new("p1")), Durability::Ephemeral(s1.clone()))?;

    let expired = store.expire_session(&s0)?;

    assert_eq!(expired, 1, "expected exactly one node to expire, got {}", expired);
    let exists = store.exists(&["/c0/LIVEINSTANCES/p0".into(), "/c0/LIVEINSTANCES/p1".into()])?;
    assert_eq!(exists, vec![false, true], "expected only the expired session's node to be removed");
    let stat = store.stat("/c0/LIVEINSTANCES/p1")?.and_then(|stat| stat.ephemeral_owner);
    assert_eq!(stat, Some(s1), "expected remaining node to keep its owner");
    Ok(())
}

#[test]
fn ephemeral_nodes_may_not_have_children() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    store.create("/c0/LIVEINSTANCES/p0", None, Durability::Ephemeral(SessionId::generate()))?;

    let res = store.create("/c0/LIVEINSTANCES/p0/child", None, Durability::Persistent);

    assert!(matches!(res, Err(StoreError::EphemeralParent(_))), "expected ephemeral parent error, got {:?}", res);
    Ok(())
}

#[test]
fn malformed_paths_are_rejected() -> Result<()> {
    let (store, _tmpdir) = fixtures::sled_store()?;
    for path in ["", "/", "c0/a", "/c0//a", "/c0/a/"] {
        let res = store.get(path);
        assert!(matches!(res, Err(StoreError::InvalidPath(_))), "expected path `{}` to be rejected, got {:?}", path, res);
    }
    Ok(())
}

#[test]
fn reopening_expires_sessions_left_by_the_previous_process() -> Result<()> {
    let tmpdir = tempfile::tempdir_in("/tmp")?;
    let store = SledStore::open(tmpdir.path())?;
    store.create("/c0/LIVEINSTANCES/p0", Some(Record::new("p0")), Durability::Ephemeral(SessionId::generate()))?;
    store.create("/c0/LIVEINSTANCES/p1", Some(Record::new("p1")), Durability::Ephemeral(SessionId::generate()))?;
    store.create("/c0/INSTANCES/p0", Some(Record::new("p0")), Durability::Persistent)?;
    store.flush()?;
    drop(store);

    let store = SledStore::open(tmpdir.path())?;

    let exists = store.exists(&["/c0/LIVEINSTANCES/p0".into(), "/c0/LIVEINSTANCES/p1".into(), "/c0/INSTANCES/p0".into()])?;
    assert_eq!(exists, vec![false, false, true], "expected only ephemeral nodes to be expired on reopen, got {:?}", exists);
    let recreated = store.create("/c0/LIVEINSTANCES/p0", None, Durability::Ephemeral(SessionId::generate()))?;
    assert!(recreated, "expected a new session to be able to claim the expired node");
    Ok(())
}
