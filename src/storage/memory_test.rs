use super::*;
use crate::model::FlowAction;

#[tokio::test]
async fn test_clones_share_state() {
    let storage = MemoryStorage::new();
    let clone = storage.clone();
    let version = FlowVersion::new_empty(Uuid::new_v4(), "Shared");

    storage.save(&version).await.unwrap();
    assert!(clone.find_one(version.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_stored_copy_is_independent_of_caller() {
    let storage = MemoryStorage::default();
    let mut version = FlowVersion::new_empty(Uuid::new_v4(), "Original");
    storage.save(&version).await.unwrap();

    version.display_name = "Changed locally".to_string();
    version.trigger.next_action = Some(Arc::new(FlowAction::code("step_1", "")));

    let stored = storage.find_one_or_throw(version.id).await.unwrap();
    assert_eq!(stored.display_name, "Original");
    assert!(stored.trigger.next_action.is_none());
}

#[tokio::test]
async fn test_same_millisecond_versions_order_by_id() {
    let storage = MemoryStorage::new();
    let flow_id = Uuid::new_v4();
    let mut a = FlowVersion::new_empty(flow_id, "a");
    let mut b = FlowVersion::new_empty(flow_id, "b");
    b.created = a.created;
    if a.id > b.id {
        std::mem::swap(&mut a, &mut b);
    }
    storage.save(&a).await.unwrap();
    storage.save(&b).await.unwrap();

    let page = storage.list(flow_id, None, 1).await.unwrap();
    assert_eq!(page.data[0].id, b.id);
    let rest = storage.list(flow_id, page.next.as_deref(), 1).await.unwrap();
    assert_eq!(rest.data[0].id, a.id);
    assert!(rest.next.is_none());
}

#[tokio::test]
async fn test_soft_delete_unknown_source_is_noop() {
    let storage = MemoryStorage::new();
    storage.soft_delete(Uuid::new_v4(), Utc::now()).await.unwrap();
    assert!(storage.list_active(0, 10).await.unwrap().is_empty());
}
