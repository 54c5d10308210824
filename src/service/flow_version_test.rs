use super::flow_version::*;
use super::validation::ValidationScope;
use crate::flow::operations::{
    AddActionRequest, ChangeNameRequest, FlowOperation, LockFlowRequest, StepLocation,
    UseAsDraftRequest,
};
use crate::model::*;
use crate::piece::InMemoryPieceRegistry;
use crate::storage::{FlowVersionRepository, MemoryStorage, SqliteStorage, Storage};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

fn release(version: &str) -> PieceMetadata {
    let mut action_props = BTreeMap::new();
    action_props.insert(
        "values".to_string(),
        PieceProperty::new("Values", PropertyType::ShortText, true),
    );
    let mut actions = BTreeMap::new();
    actions.insert(
        "add_row".to_string(),
        ActionMetadata {
            name: "add_row".to_string(),
            display_name: "Add Row".to_string(),
            description: None,
            props: action_props,
            require_auth: false,
        },
    );

    let mut trigger_props = BTreeMap::new();
    trigger_props.insert(
        "sheet".to_string(),
        PieceProperty::new("Sheet", PropertyType::ShortText, true),
    );
    let mut triggers = BTreeMap::new();
    triggers.insert(
        "new_row".to_string(),
        TriggerMetadata {
            name: "new_row".to_string(),
            display_name: "New Row".to_string(),
            description: None,
            props: trigger_props,
            strategy: TriggerStrategy::Polling,
            require_auth: false,
            renew_configuration: None,
            sample_data: None,
        },
    );

    PieceMetadata {
        name: "@x/y".to_string(),
        display_name: "Sheets".to_string(),
        version: version.to_string(),
        auth: None,
        actions,
        triggers,
    }
}

fn service_with(storage: Arc<dyn Storage>) -> FlowVersionService {
    let registry = InMemoryPieceRegistry::new();
    registry.extend([release("1.2.0"), release("1.2.5")]);
    FlowVersionService::new(storage, Arc::new(registry))
}

fn service() -> (Arc<MemoryStorage>, FlowVersionService) {
    let storage = Arc::new(MemoryStorage::new());
    (storage.clone(), service_with(storage))
}

fn input(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn valid_trigger() -> FlowTrigger {
    FlowTrigger::piece(
        "New Row",
        "@x/y",
        "~1.2.0",
        "new_row",
        input(json!({"sheet": "{{connections['sheets-1']}}"})),
    )
}

fn params<'a>(version: &'a FlowVersion, operation: FlowOperation) -> ApplyOperationParams<'a> {
    ApplyOperationParams {
        flow_version: version,
        project_id: "proj_1",
        platform_id: None,
        user_id: Some("user_1"),
        operation,
        transaction: None,
    }
}

fn add_after(parent: &str, action: FlowAction) -> FlowOperation {
    FlowOperation::AddAction(AddActionRequest {
        parent_step: parent.to_string(),
        step_location_relative_to_parent: StepLocation::After,
        branch_index: None,
        branch_name: None,
        action,
    })
}

async fn draft_with_trigger(service: &FlowVersionService) -> FlowVersion {
    let empty = service
        .create_empty_version(Uuid::new_v4(), "My Flow", None)
        .await
        .unwrap();
    service
        .apply_operation(params(&empty, FlowOperation::UpdateTrigger(valid_trigger())))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_add_then_validate_scenario() {
    let (storage, service) = service();

    let empty = service
        .create_empty_version(Uuid::new_v4(), "My Flow", None)
        .await
        .unwrap();
    assert_eq!(empty.trigger.trigger_type(), FlowTriggerType::Empty);
    assert!(!empty.valid);

    let with_trigger = service
        .apply_operation(params(&empty, FlowOperation::UpdateTrigger(valid_trigger())))
        .await
        .unwrap();
    assert!(with_trigger.trigger.valid);
    assert!(with_trigger.valid);
    assert_eq!(with_trigger.connection_ids, vec!["sheets-1"]);
    assert_eq!(with_trigger.updated_by.as_deref(), Some("user_1"));

    let missing_prop = FlowAction::piece("step_1", "@x/y", "~1.2.0", "add_row", Map::new());
    let with_action = service
        .apply_operation(params(&with_trigger, add_after("trigger", missing_prop)))
        .await
        .expect("invalid steps must not fail the operation");
    let step_1 = with_action.trigger.next_action.as_ref().unwrap();
    assert!(!step_1.valid);
    assert!(!with_action.valid);

    let stored = storage.find_one_or_throw(with_action.id).await.unwrap();
    assert_eq!(stored, with_action);
}

#[tokio::test]
async fn test_lock_flow_pins_resolved_versions() {
    let (storage, service) = service();
    let draft = draft_with_trigger(&service).await;
    let draft = service
        .apply_operation(params(
            &draft,
            add_after(
                "trigger",
                FlowAction::piece("step_1", "@x/y", "^1.0.0", "add_row", input(json!({"values": "x"}))),
            ),
        ))
        .await
        .unwrap();

    let locked = service
        .apply_operation(params(
            &draft,
            FlowOperation::LockFlow(LockFlowRequest::default()),
        ))
        .await
        .unwrap();

    assert!(locked.is_locked());
    assert_eq!(locked.id, draft.id);
    assert_eq!(locked.trigger.piece_settings().unwrap().piece_version, "1.2.5");
    let step_1 = locked.trigger.next_action.as_ref().unwrap();
    assert_eq!(step_1.piece_settings().unwrap().piece_version, "1.2.5");
    assert!(storage.find_one_or_throw(draft.id).await.unwrap().is_locked());

    // a second pin on a locked version changes nothing
    let again = service
        .lock_piece_versions(ValidationScope::default(), &locked)
        .await
        .unwrap();
    assert_eq!(again, locked);
}

#[tokio::test]
async fn test_lock_rejects_invalid_versions() {
    let (storage, service) = service();
    let empty = service
        .create_empty_version(Uuid::new_v4(), "My Flow", None)
        .await
        .unwrap();

    let err = service
        .apply_operation(params(&empty, FlowOperation::LockFlow(LockFlowRequest::default())))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    let draft = draft_with_trigger(&service).await;
    let missing_prop = FlowAction::piece("step_1", "@x/y", "~1.2.0", "add_row", Map::new());
    let draft = service
        .apply_operation(params(&draft, add_after("trigger", missing_prop)))
        .await
        .unwrap();
    let err = service
        .apply_operation(params(&draft, FlowOperation::LockFlow(LockFlowRequest::default())))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    for id in [empty.id, draft.id] {
        let stored = storage.find_one_or_throw(id).await.unwrap();
        assert_eq!(stored.state, FlowVersionState::Draft);
    }
}

#[tokio::test]
async fn test_locking_a_locked_version_is_a_no_op() {
    let (storage, service) = service();
    let draft = draft_with_trigger(&service).await;
    let locked = service
        .apply_operation(params(&draft, FlowOperation::LockFlow(LockFlowRequest::default())))
        .await
        .unwrap();
    let before = storage.find_one_or_throw(locked.id).await.unwrap();

    let again = service
        .apply_operation(ApplyOperationParams {
            user_id: Some("someone_else"),
            ..params(&locked, FlowOperation::LockFlow(LockFlowRequest::default()))
        })
        .await
        .unwrap();

    assert_eq!(again, locked);
    let after = storage.find_one_or_throw(locked.id).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.updated_by.as_deref(), Some("user_1"));
}

#[tokio::test]
async fn test_lock_only_changes_piece_versions() {
    let (_storage, service) = service();
    let draft = draft_with_trigger(&service).await;
    let draft = service
        .apply_operation(params(&draft, add_after("trigger", FlowAction::code("step_1", "1"))))
        .await
        .unwrap();

    let pinned = service
        .lock_piece_versions(ValidationScope::default(), &draft)
        .await
        .unwrap();
    assert_eq!(pinned.state, FlowVersionState::Draft);
    assert_eq!(pinned.trigger.next_action, draft.trigger.next_action);
    assert_ne!(pinned.trigger, draft.trigger);
}

#[tokio::test]
async fn test_lock_with_unknown_piece_fails() {
    let (_storage, service) = service();
    let empty = service
        .create_empty_version(Uuid::new_v4(), "Flow", None)
        .await
        .unwrap();
    let mut version = empty.clone();
    version.trigger = FlowTrigger::piece("Gone", "@x/gone", "1.0.0", "t", Map::new());

    let err = service
        .lock_piece_versions(ValidationScope::default(), &version)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PIECE_NOT_FOUND");
}

#[tokio::test]
async fn test_editing_locked_version_forks_draft() {
    let (storage, service) = service();
    let draft = draft_with_trigger(&service).await;
    let locked = service
        .apply_operation(params(&draft, FlowOperation::LockFlow(LockFlowRequest::default())))
        .await
        .unwrap();

    let renamed = service
        .apply_operation(params(
            &locked,
            FlowOperation::ChangeName(ChangeNameRequest {
                display_name: "Next".to_string(),
            }),
        ))
        .await
        .unwrap();

    assert_ne!(renamed.id, locked.id);
    assert_eq!(renamed.flow_id, locked.flow_id);
    assert_eq!(renamed.state, FlowVersionState::Draft);
    assert_eq!(renamed.display_name, "Next");

    let original = storage.find_one_or_throw(locked.id).await.unwrap();
    assert!(original.is_locked());
    assert_eq!(original.display_name, "My Flow");
}

#[tokio::test]
async fn test_use_as_draft_imports_historical_version() {
    let (_storage, service) = service();
    let old = draft_with_trigger(&service).await;
    let current = service
        .create_empty_version(old.flow_id, "Current", None)
        .await
        .unwrap();

    let restored = service
        .apply_operation(params(
            &current,
            FlowOperation::UseAsDraft(UseAsDraftRequest { version_id: old.id }),
        ))
        .await
        .unwrap();

    assert_eq!(restored.id, current.id);
    assert_eq!(restored.display_name, old.display_name);
    assert_eq!(restored.trigger, old.trigger);
    assert_eq!(restored.connection_ids, old.connection_ids);
}

#[tokio::test]
async fn test_use_as_draft_rejects_foreign_or_missing_versions() {
    let (_storage, service) = service();
    let foreign = draft_with_trigger(&service).await;
    let current = service
        .create_empty_version(Uuid::new_v4(), "Current", None)
        .await
        .unwrap();

    for version_id in [foreign.id, Uuid::new_v4()] {
        let err = service
            .apply_operation(params(
                &current,
                FlowOperation::UseAsDraft(UseAsDraftRequest { version_id }),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENTITY_NOT_FOUND");
    }
}

#[tokio::test]
async fn test_structural_errors_propagate() {
    let (_storage, service) = service();
    let draft = draft_with_trigger(&service).await;
    let err = service
        .apply_operation(params(
            &draft,
            FlowOperation::UpdateAction(FlowAction::code("step_404", "")),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ENTITY_NOT_FOUND");
}

#[tokio::test]
async fn test_get_flow_version_or_throw() {
    let (_storage, service) = service();
    let draft = draft_with_trigger(&service).await;

    let plain = service
        .get_flow_version_or_throw(draft.flow_id, Some(draft.id), ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(plain, draft);

    let latest = service
        .get_flow_version_or_throw(draft.flow_id, None, ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(latest.id, draft.id);

    let stripped = service
        .get_flow_version_or_throw(
            draft.flow_id,
            Some(draft.id),
            ExportOptions {
                remove_connections: true,
                remove_sample_data: true,
            },
        )
        .await
        .unwrap();
    let settings = stripped.trigger.piece_settings().unwrap();
    assert!(!settings.input.contains_key("sheet"));
    assert!(stripped.connection_ids.is_empty());

    let err = service
        .get_flow_version_or_throw(Uuid::new_v4(), Some(draft.id), ExportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ENTITY_NOT_FOUND");
}

#[tokio::test]
async fn test_reads_migrate_legacy_rows() {
    let (storage, service) = service();
    let mut legacy = FlowVersion::new_empty(Uuid::new_v4(), "Legacy");
    legacy.schema_version = None;
    legacy.trigger = FlowTrigger::piece(
        "New Row",
        "sheets",
        "0.3.1",
        "new_row",
        input(json!({"auth": "{{connections.sheets}}"})),
    );
    storage.save(&legacy).await.unwrap();

    let read = service.get_one(legacy.id).await.unwrap().unwrap();
    assert_eq!(read.schema_version, Some(crate::constants::LATEST_SCHEMA_VERSION));
    assert_eq!(
        read.trigger.piece_settings().unwrap().piece_name,
        "@activepieces/piece-sheets"
    );

    let stored = storage.find_one_or_throw(legacy.id).await.unwrap();
    assert_eq!(stored.schema_version, Some(crate::constants::LATEST_SCHEMA_VERSION));
    assert_eq!(stored.connection_ids, vec!["sheets"]);
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let (storage, service) = service();
    let flow_id = Uuid::new_v4();
    let mut ids = Vec::new();
    for i in 0..3 {
        let mut version = FlowVersion::new_empty(flow_id, format!("v{}", i));
        version.created = chrono::DateTime::from_timestamp_millis(1_000 * (i + 1)).unwrap();
        ids.push(version.id);
        storage.save(&version).await.unwrap();
    }

    let page = service.list(flow_id, None, Some(2)).await.unwrap();
    assert_eq!(page.data.iter().map(|v| v.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    let rest = service
        .list(flow_id, page.next.as_deref(), Some(2))
        .await
        .unwrap();
    assert_eq!(rest.data.iter().map(|v| v.id).collect::<Vec<_>>(), vec![ids[0]]);
    assert!(rest.next.is_none());
}

#[tokio::test]
async fn test_apply_inside_caller_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pieceflow.db");
    let storage = Arc::new(SqliteStorage::new(path.to_str().unwrap()).await.unwrap());
    let service = service_with(storage.clone());

    let empty = service
        .create_empty_version(Uuid::new_v4(), "Tx Flow", None)
        .await
        .unwrap();

    let tx = storage.begin().await.unwrap();
    let renamed = service
        .apply_operation(ApplyOperationParams {
            transaction: Some(&tx),
            ..params(
                &empty,
                FlowOperation::ChangeName(ChangeNameRequest {
                    display_name: "Inside".to_string(),
                }),
            )
        })
        .await
        .unwrap();

    let before_commit = storage.find_one_or_throw(empty.id).await.unwrap();
    assert_eq!(before_commit.display_name, "Tx Flow");

    tx.commit().await.unwrap();
    let after_commit = storage.find_one_or_throw(empty.id).await.unwrap();
    assert_eq!(after_commit.display_name, renamed.display_name);
}

#[tokio::test]
async fn test_use_as_draft_of_legacy_version_rolls_back_with_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pieceflow.db");
    let storage = Arc::new(SqliteStorage::new(path.to_str().unwrap()).await.unwrap());
    let service = service_with(storage.clone());

    let mut legacy = FlowVersion::new_empty(Uuid::new_v4(), "Legacy");
    legacy.schema_version = None;
    legacy.trigger = FlowTrigger::piece(
        "New Row",
        "sheets",
        "0.3.1",
        "new_row",
        input(json!({"auth": "{{connections.sheets}}"})),
    );
    storage.save(&legacy).await.unwrap();
    let current = service
        .create_empty_version(legacy.flow_id, "Current", None)
        .await
        .unwrap();

    let tx = storage.begin().await.unwrap();
    let restored = service
        .apply_operation(ApplyOperationParams {
            transaction: Some(&tx),
            ..params(
                &current,
                FlowOperation::UseAsDraft(UseAsDraftRequest {
                    version_id: legacy.id,
                }),
            )
        })
        .await
        .unwrap();
    assert_eq!(restored.display_name, "Legacy");
    assert_eq!(
        restored.trigger.piece_settings().unwrap().piece_name,
        "@activepieces/piece-sheets"
    );

    tx.rollback().await.unwrap();
    let stored_legacy = storage.find_one_or_throw(legacy.id).await.unwrap();
    assert_eq!(stored_legacy.schema_version, None);
    let stored_current = storage.find_one_or_throw(current.id).await.unwrap();
    assert_eq!(stored_current.display_name, "Current");
}

#[test]
fn test_export_version_without_options_is_identity() {
    let version = FlowVersion::new_empty(Uuid::new_v4(), "Flow");
    assert_eq!(export_version(&version, ExportOptions::default()), version);
}
