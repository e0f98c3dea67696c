use super::*;
use crate::sync::test_support::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HUB: &str = "b.hub";
const PROJECT: &str = "b.prj";

fn ids(walk: &Walk) -> Vec<(&str, &str)> {
    walk.nodes
        .iter()
        .map(|node| (node.id.as_str(), node.parent_id.as_str()))
        .collect()
}

/// F1 holds sub-folder F2 and item I1; F2 holds item I2.
async fn mount_two_level_tree(server: &MockServer, f2_calls: u64) {
    mount_top_folders(server, HUB, PROJECT, vec![folder_json("F1", "Project Files")]).await;
    mount_folder(
        server,
        PROJECT,
        "F1",
        vec![folder_json("F2", "Design"), item_json("I1", "model.rvt")],
        1,
    )
    .await;
    mount_folder(server, PROJECT, "F2", vec![item_json("I2", "detail.dwg")], f2_calls).await;
    mount_translated_item(server, PROJECT, "I1", "urn-i1").await;
    mount_translated_item(server, PROJECT, "I2", "urn-i2").await;
}

#[tokio::test]
async fn first_level_walk_stops_below_top_folder_children() {
    let server = MockServer::start().await;
    mount_two_level_tree(&server, 0).await;
    let store = make_store().await;
    let tokens = static_tokens(&store, &server).await;
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let walk = HierarchyWalker::new(&client, &tokens)
        .walk_project(HUB, PROJECT, Depth::FirstLevel)
        .await
        .unwrap();

    assert_eq!(
        ids(&walk),
        vec![("F1", PROJECT), ("F2", "F1"), ("I1", "F1")]
    );
    assert!(walk.failures.is_empty());
    let item = &walk.nodes[2];
    assert_eq!(item.kind, ContentKind::Item);
    let viewer = item.viewer.as_ref().unwrap();
    assert_eq!(viewer.urn, "urn-i1");
    assert!(viewer.translated);
}

#[tokio::test]
async fn all_levels_walk_visits_breadth_first() {
    let server = MockServer::start().await;
    mount_two_level_tree(&server, 1).await;
    let store = make_store().await;
    let tokens = static_tokens(&store, &server).await;
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let walk = HierarchyWalker::new(&client, &tokens)
        .walk_project(HUB, PROJECT, Depth::AllLevels)
        .await
        .unwrap();

    assert_eq!(
        ids(&walk),
        vec![("F1", PROJECT), ("F2", "F1"), ("I1", "F1"), ("I2", "F2")]
    );
    assert!(walk.failures.is_empty());
}

#[tokio::test]
async fn cycle_back_to_an_ancestor_is_skipped() {
    let server = MockServer::start().await;
    mount_top_folders(&server, HUB, PROJECT, vec![folder_json("F1", "Root")]).await;
    mount_folder(&server, PROJECT, "F1", vec![folder_json("F2", "Child")], 1).await;
    mount_folder(&server, PROJECT, "F2", vec![folder_json("F1", "Root again")], 1).await;
    let store = make_store().await;
    let tokens = static_tokens(&store, &server).await;
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let walk = HierarchyWalker::new(&client, &tokens)
        .walk_project(HUB, PROJECT, Depth::AllLevels)
        .await
        .unwrap();

    assert_eq!(ids(&walk), vec![("F1", PROJECT), ("F2", "F1")]);
    assert_eq!(walk.nodes[0].name, "Root");
}

#[tokio::test]
async fn failed_folder_listing_is_recorded_and_siblings_continue() {
    let server = MockServer::start().await;
    mount_top_folders(
        &server,
        HUB,
        PROJECT,
        vec![folder_json("F1", "Broken"), folder_json("F2", "Fine")],
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("/data/v1/projects/{PROJECT}/folders/F1/contents")))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;
    mount_folder(&server, PROJECT, "F2", vec![folder_json("F3", "Nested")], 1).await;
    let store = make_store().await;
    let tokens = static_tokens(&store, &server).await;
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let walk = HierarchyWalker::new(&client, &tokens)
        .walk_project(HUB, PROJECT, Depth::FirstLevel)
        .await
        .unwrap();

    assert_eq!(
        ids(&walk),
        vec![("F1", PROJECT), ("F2", PROJECT), ("F3", "F2")]
    );
    assert_eq!(walk.failures.len(), 1);
    assert_eq!(walk.failures[0].scope, "folder F1");
}

#[tokio::test]
async fn item_without_versions_is_kept_without_viewer_fields() {
    let server = MockServer::start().await;
    mount_top_folders(&server, HUB, PROJECT, vec![folder_json("F1", "Root")]).await;
    mount_folder(&server, PROJECT, "F1", vec![item_json("I1", "empty.pdf")], 1).await;
    Mock::given(method("GET"))
        .and(path(format!("/data/v1/projects/{PROJECT}/items/I1/versions")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
        .mount(&server)
        .await;
    let store = make_store().await;
    let tokens = static_tokens(&store, &server).await;
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let walk = HierarchyWalker::new(&client, &tokens)
        .walk_project(HUB, PROJECT, Depth::FirstLevel)
        .await
        .unwrap();

    assert_eq!(ids(&walk), vec![("F1", PROJECT), ("I1", "F1")]);
    assert!(walk.nodes[1].viewer.is_none());
    assert_eq!(walk.failures.len(), 1);
    assert_eq!(walk.failures[0].scope, "item I1");
}

#[tokio::test]
async fn top_folder_listing_failure_aborts_the_walk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/project/v1/hubs/{HUB}/projects/{PROJECT}/topFolders"
        )))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let store = make_store().await;
    let tokens = static_tokens(&store, &server).await;
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let err = HierarchyWalker::new(&client, &tokens)
        .walk_project(HUB, PROJECT, Depth::FirstLevel)
        .await
        .unwrap_err();

    assert!(matches!(err, WalkError::Api(ApsError::Api { .. })));
}

#[tokio::test]
async fn folder_walk_emits_children_only() {
    let server = MockServer::start().await;
    mount_two_level_tree(&server, 0).await;
    let store = make_store().await;
    let tokens = static_tokens(&store, &server).await;
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let walk = HierarchyWalker::new(&client, &tokens)
        .walk_folder(PROJECT, "F1", Depth::FirstLevel)
        .await
        .unwrap();

    assert_eq!(ids(&walk), vec![("F2", "F1"), ("I1", "F1")]);
}

#[tokio::test]
async fn missing_access_token_aborts_before_any_request() {
    let server = MockServer::start().await;
    let store = make_store().await;
    let tokens = TokenProvider::new(
        std::sync::Arc::clone(&store),
        server.uri(),
        std::time::Duration::from_secs(300),
    );
    let client = ApsClient::with_base_url(&server.uri()).unwrap();

    let err = HierarchyWalker::new(&client, &tokens)
        .walk_project(HUB, PROJECT, Depth::FirstLevel)
        .await
        .unwrap_err();

    assert!(matches!(err, WalkError::Token(TokenError::Missing(_))));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
