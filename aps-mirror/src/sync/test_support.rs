use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::storage::{MirrorStore, TokenKind};
use crate::token_provider::TokenProvider;

pub const TOKEN: &str = "test-token";

pub async fn make_store() -> Arc<MirrorStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = MirrorStore::from_pool(pool);
    store.init().await.unwrap();
    Arc::new(store)
}

/// A provider whose access token has no recorded lifetime, so it never refreshes.
pub async fn static_tokens(store: &Arc<MirrorStore>, server: &MockServer) -> Arc<TokenProvider> {
    store
        .upsert_token(TokenKind::AccessToken, TOKEN, None)
        .await
        .unwrap();
    Arc::new(TokenProvider::new(
        Arc::clone(store),
        server.uri(),
        Duration::from_secs(300),
    ))
}

pub fn folder_json(id: &str, name: &str) -> serde_json::Value {
    json!({ "type": "folders", "id": id, "attributes": { "name": name } })
}

pub fn item_json(id: &str, name: &str) -> serde_json::Value {
    json!({ "type": "items", "id": id, "attributes": { "displayName": name } })
}

pub async fn mount_top_folders(
    server: &MockServer,
    hub_id: &str,
    project_id: &str,
    folders: Vec<serde_json::Value>,
) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/project/v1/hubs/{hub_id}/projects/{project_id}/topFolders"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": folders })))
        .mount(server)
        .await;
}

pub async fn mount_folder(
    server: &MockServer,
    project_id: &str,
    folder_id: &str,
    entries: Vec<serde_json::Value>,
    expected_calls: impl Into<wiremock::Times>,
) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/data/v1/projects/{project_id}/folders/{folder_id}/contents"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": entries })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Mounts a single-version item whose derivative manifest reports a finished
/// 3d viewable.
pub async fn mount_translated_item(server: &MockServer, project_id: &str, item_id: &str, urn: &str) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/data/v1/projects/{project_id}/items/{item_id}/versions"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "type": "versions",
                "id": format!("{item_id}?version=1"),
                "attributes": { "extension": { "type": "versions:autodesk.bim360:File" } },
                "relationships": { "derivatives": { "data": { "id": urn } } }
            }]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/modelderivative/v2/designdata/{urn}/manifest")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "derivatives": [{
                "outputType": "svf2",
                "children": [{ "role": "3d", "status": "success" }]
            }]
        })))
        .mount(server)
        .await;
}
