use super::*;
use crate::config::PiecesConfig;
use crate::model::{
    ActionMetadata, FlowAction, FlowTrigger, FlowVersionState, PieceMetadata, TriggerMetadata,
    TriggerStrategy,
};
use clap::CommandFactory;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn write_pieces(dir: &TempDir) -> PathBuf {
    let piece = PieceMetadata {
        name: "@x/y".to_string(),
        display_name: "Y".to_string(),
        version: "1.2.3".to_string(),
        auth: None,
        actions: BTreeMap::from([(
            "send".to_string(),
            ActionMetadata {
                name: "send".to_string(),
                display_name: "Send".to_string(),
                description: None,
                props: BTreeMap::new(),
                require_auth: false,
            },
        )]),
        triggers: BTreeMap::from([(
            "new_item".to_string(),
            TriggerMetadata {
                name: "new_item".to_string(),
                display_name: "New Item".to_string(),
                description: None,
                props: BTreeMap::new(),
                strategy: TriggerStrategy::Polling,
                require_auth: false,
                renew_configuration: None,
                sample_data: None,
            },
        )]),
    };
    let path = dir.path().join("pieces.json");
    std::fs::write(&path, serde_json::to_string(&vec![piece]).unwrap()).unwrap();
    path
}

fn write_flow(dir: &TempDir) -> PathBuf {
    let mut version = FlowVersion::new_empty(uuid::Uuid::new_v4(), "CLI flow");
    let mut input = Map::new();
    input.insert("auth".to_string(), json!("{{connections['my-conn']}}"));
    let action = FlowAction::piece("step_1", "@x/y", "~1.2.0", "missing_action", input);
    version.trigger = FlowTrigger::empty();
    version.trigger.next_action = Some(Arc::new(action));
    version.connection_ids = vec!["my-conn".to_string()];
    let path = dir.path().join("flow.json");
    std::fs::write(&path, serde_json::to_string(&version).unwrap()).unwrap();
    path
}

/// A flow every step of which resolves against `write_pieces`
fn write_valid_flow(dir: &TempDir) -> PathBuf {
    let mut version = FlowVersion::new_empty(uuid::Uuid::new_v4(), "Valid flow");
    version.trigger = FlowTrigger::piece("New Item", "@x/y", "~1.2.0", "new_item", Map::new());
    let action = FlowAction::piece("step_1", "@x/y", "~1.2.0", "send", Map::new());
    version.trigger.next_action = Some(Arc::new(action));
    let path = dir.path().join("valid.json");
    std::fs::write(&path, serde_json::to_string(&version).unwrap()).unwrap();
    path
}

fn config_with_pieces(path: &Path) -> Config {
    Config {
        pieces: PiecesConfig {
            source: "file".to_string(),
            path: Some(path.display().to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

fn read_output(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_export_flags() {
    let cli = parse(&["pieceflow", "export", "flow.json", "--strip-connections"]);
    match cli.command {
        Commands::Export {
            strip_connections,
            strip_sample_data,
            ..
        } => {
            assert!(strip_connections);
            assert!(!strip_sample_data);
        }
        other => panic!("unexpected command {:?}", other),
    }
    assert_eq!(cli.project, "default");
}

#[tokio::test]
async fn test_export_strips_connections() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir);
    let out = dir.path().join("out.json");
    let cli = parse(&[
        "pieceflow",
        "export",
        flow.to_str().unwrap(),
        "--strip-connections",
        "-o",
        out.to_str().unwrap(),
    ]);

    execute(cli, &Config::default()).await.unwrap();

    let exported = read_output(&out);
    assert_eq!(exported["connectionIds"], json!([]));
    assert!(
        exported["trigger"]["nextAction"]["settings"]["input"]
            .get("auth")
            .is_none()
    );
}

#[tokio::test]
async fn test_validate_reports_invalid_steps() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir);
    let pieces = write_pieces(&dir);
    let out = dir.path().join("report.json");
    let cli = parse(&[
        "pieceflow",
        "validate",
        flow.to_str().unwrap(),
        "--output",
        out.to_str().unwrap(),
    ]);

    let err = execute(cli, &config_with_pieces(&pieces)).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert!(err.to_string().ends_with("has invalid steps: trigger, step_1"));

    let report = read_output(&out);
    assert_eq!(report["valid"], json!(false));
    assert_eq!(report["steps"][0]["name"], json!("trigger"));
    assert_eq!(report["steps"][1], json!({"name": "step_1", "valid": false}));
}

#[tokio::test]
async fn test_lock_pins_versions() {
    let dir = TempDir::new().unwrap();
    let flow = write_valid_flow(&dir);
    let pieces = write_pieces(&dir);
    let out = dir.path().join("locked.json");
    let cli = parse(&[
        "pieceflow",
        "lock",
        flow.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]);

    execute(cli, &config_with_pieces(&pieces)).await.unwrap();

    let locked: FlowVersion = serde_json::from_value(read_output(&out)).unwrap();
    assert_eq!(locked.state, FlowVersionState::Locked);
    assert!(locked.valid);
    assert_eq!(locked.trigger.piece_settings().unwrap().piece_version, "1.2.3");
    let step = locked.trigger.next_action.as_ref().unwrap();
    assert_eq!(step.piece_settings().unwrap().piece_version, "1.2.3");
}

#[tokio::test]
async fn test_lock_refuses_invalid_flow() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir);
    let pieces = write_pieces(&dir);
    let out = dir.path().join("locked.json");
    let cli = parse(&[
        "pieceflow",
        "lock",
        flow.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]);

    let err = execute(cli, &config_with_pieces(&pieces)).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert!(!out.exists());
}

#[tokio::test]
async fn test_apply_operation_document() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir);
    let operation = dir.path().join("op.json");
    std::fs::write(
        &operation,
        r#"{"type": "CHANGE_NAME", "request": {"displayName": "Renamed"}}"#,
    )
    .unwrap();
    let out = dir.path().join("next.json");
    let cli = parse(&[
        "pieceflow",
        "apply",
        flow.to_str().unwrap(),
        operation.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]);

    execute(cli, &Config::default()).await.unwrap();
    assert_eq!(read_output(&out)["displayName"], json!("Renamed"));
}

#[tokio::test]
async fn test_missing_flow_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.json");
    let cli = parse(&["pieceflow", "migrate", missing.to_str().unwrap()]);
    let err = execute(cli, &Config::default()).await.unwrap_err();
    assert_eq!(err.code(), "IO");
}

#[tokio::test]
async fn test_refill_against_memory_storage() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("refill.json");
    let config = Config {
        storage: crate::config::StorageConfig {
            driver: "memory".to_string(),
            dsn: String::new(),
        },
        ..Default::default()
    };
    let cli = parse(&["pieceflow", "refill", "-o", out.to_str().unwrap()]);

    execute(cli, &config).await.unwrap();
    let report = read_output(&out);
    assert_eq!(report["polling"]["scanned"], json!(0));
    assert_eq!(report["executeFlow"]["updated"], json!(0));
}
