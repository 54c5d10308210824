use super::*;
use crate::model::{ActionMetadata, PieceProperty, PropertyType};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

fn release(name: &str, version: &str) -> PieceMetadata {
    let mut props = BTreeMap::new();
    props.insert(
        "channel".to_string(),
        PieceProperty::new("Channel", PropertyType::ShortText, true),
    );
    let mut actions = BTreeMap::new();
    actions.insert(
        "send_message".to_string(),
        ActionMetadata {
            name: "send_message".to_string(),
            display_name: "Send Message".to_string(),
            description: None,
            props,
            require_auth: true,
        },
    );
    PieceMetadata {
        name: name.to_string(),
        display_name: "Slack".to_string(),
        version: version.to_string(),
        auth: None,
        actions,
        triggers: BTreeMap::new(),
    }
}

fn registry() -> InMemoryPieceRegistry {
    let registry = InMemoryPieceRegistry::new();
    registry.extend([
        release("@activepieces/piece-slack", "0.3.1"),
        release("@activepieces/piece-slack", "0.3.4"),
        release("@activepieces/piece-slack", "0.4.0"),
        release("@activepieces/piece-slack", "0.5.0-beta.1"),
    ]);
    registry
}

#[tokio::test]
async fn test_resolves_ranges_to_highest_match() {
    let registry = registry();

    let tilde = registry
        .get(&PieceQuery::new("@activepieces/piece-slack", "~0.3.1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tilde.version, "0.3.4");

    let caret = registry
        .get(&PieceQuery::new("@activepieces/piece-slack", "^0.4.0"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(caret.version, "0.4.0");

    let exact = registry
        .get(&PieceQuery::new("@activepieces/piece-slack", "0.3.1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exact.version, "0.3.1");
}

#[tokio::test]
async fn test_latest_skips_prereleases() {
    let registry = registry();
    let latest = registry
        .get(&PieceQuery::new("@activepieces/piece-slack", ""))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.version, "0.4.0");
}

#[tokio::test]
async fn test_missing_piece_and_version() {
    let registry = registry();
    assert!(
        registry
            .get(&PieceQuery::new("@activepieces/piece-gmail", "0.1.0"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        registry
            .get(&PieceQuery::new("@activepieces/piece-slack", "9.9.9"))
            .await
            .unwrap()
            .is_none()
    );

    let err = registry
        .get_or_throw(&PieceQuery::new("@activepieces/piece-gmail", "0.1.0"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PIECE_NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_version_is_an_error() {
    let registry = registry();
    let result = registry
        .get(&PieceQuery::new("@activepieces/piece-slack", "not a version"))
        .await;
    assert!(result.is_err());
}

#[test]
fn test_insert_replaces_same_version() {
    let registry = InMemoryPieceRegistry::new();
    registry.insert(release("@activepieces/piece-slack", "0.3.1"));
    registry.insert(release("@activepieces/piece-slack", "0.3.1"));
    assert_eq!(registry.len(), 1);
    assert!(!registry.is_empty());
}

#[tokio::test]
async fn test_load_pieces_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pieces.json");
    std::fs::write(
        &path,
        serde_json::to_string(&vec![
            release("@activepieces/piece-slack", "0.3.1"),
            release("@activepieces/piece-slack", "0.3.2"),
        ])
        .unwrap(),
    )
    .unwrap();

    let registry = load_pieces_file(&path).await.unwrap();
    assert_eq!(registry.len(), 2);
    let piece = registry
        .get_or_throw(&PieceQuery::new("@activepieces/piece-slack", "~0.3.0"))
        .await
        .unwrap();
    assert_eq!(piece.version, "0.3.2");
}

#[tokio::test]
async fn test_remote_registry_fetches_metadata() {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/pieces/@activepieces/piece-slack"))
        .and(query_param("version", "~0.3.1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::to_value(release("@activepieces/piece-slack", "0.3.4")).unwrap()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/pieces/@activepieces/piece-missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "code": "NOT_FOUND" })))
        .mount(&mock_server)
        .await;

    let remote = RemotePieceRegistry::new(&mock_server.uri(), Duration::from_secs(5)).unwrap();

    let piece = remote
        .get(&PieceQuery::new("@activepieces/piece-slack", "~0.3.1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(piece.version, "0.3.4");
    assert!(piece.action("send_message").is_some());

    let missing = remote
        .get(&PieceQuery::new("@activepieces/piece-missing", "1.0.0"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_remote_registry_surfaces_server_errors() {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let remote = RemotePieceRegistry::new(&mock_server.uri(), Duration::from_secs(5)).unwrap();
    let err = remote
        .get(&PieceQuery::new("@activepieces/piece-slack", "0.3.1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NETWORK");
}

#[tokio::test]
async fn test_create_piece_provider_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pieces.yaml");
    std::fs::write(
        &path,
        serde_yaml::to_string(&vec![release("@activepieces/piece-slack", "0.3.1")]).unwrap(),
    )
    .unwrap();

    let file = PiecesConfig {
        source: "file".to_string(),
        path: Some(path.display().to_string()),
        ..Default::default()
    };
    let provider = create_piece_provider(&file).await.unwrap();
    assert!(
        provider
            .get(&PieceQuery::new("@activepieces/piece-slack", "0.3.1"))
            .await
            .unwrap()
            .is_some()
    );

    let memory = create_piece_provider(&PiecesConfig::default()).await.unwrap();
    assert!(
        memory
            .get(&PieceQuery::new("@activepieces/piece-slack", ""))
            .await
            .unwrap()
            .is_none()
    );

    let remote_without_url = PiecesConfig {
        source: "remote".to_string(),
        ..Default::default()
    };
    let err = create_piece_provider(&remote_without_url).await.err().unwrap();
    assert_eq!(err.code(), "CONFIG");
}
