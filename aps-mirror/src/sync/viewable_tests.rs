use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const URN: &str = "dXJuOmFkc2s";
const MANIFEST_PATH: &str = "/modelderivative/v2/designdata/dXJuOmFkc2s/manifest";
const JOB_PATH: &str = "/modelderivative/v2/designdata/job";

fn client(server: &MockServer) -> ApsClient {
    ApsClient::with_base_url(&server.uri()).unwrap()
}

async fn mount_manifest(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

fn candidate(format: &str, view: &str) -> serde_json::Value {
    json!({ "output": { "formats": [{ "type": format, "views": [view] }] } })
}

async fn submitted_candidates(server: &MockServer) -> Vec<(String, String)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|req| req.url.path() == JOB_PATH)
        .map(|req| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let format = &body["output"]["formats"][0];
            (
                format["type"].as_str().unwrap().to_string(),
                format["views"][0].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn viewer_info_prefers_derivative_urn_of_latest_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/v1/projects/b.prj/items/i-1/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "type": "versions",
                    "id": "v-old",
                    "attributes": {},
                    "relationships": { "derivatives": { "data": { "id": "stale" } } }
                },
                {
                    "type": "versions",
                    "id": "v-new",
                    "attributes": { "extension": { "type": "versions:autodesk.fusion360:Design" } },
                    "relationships": {
                        "derivatives": { "data": { "id": URN } },
                        "storage": { "data": { "id": "urn:adsk.objects:os.object:x/y" } }
                    }
                }
            ]
        })))
        .mount(&server)
        .await;
    mount_manifest(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })),
    )
    .await;

    let info = viewer_info(&client(&server), "t", "b.prj", "i-1")
        .await
        .unwrap();

    assert_eq!(info.version_id, "v-new");
    assert_eq!(info.urn, URN);
    assert_eq!(info.data_type, "versions:autodesk.fusion360:Design");
    assert!(info.translated);
}

#[tokio::test]
async fn viewer_info_encodes_storage_id_when_no_derivative() {
    let server = MockServer::start().await;
    let storage_id = "urn:adsk.objects:os.object:wip.dm.prod/model.rvt";
    let expected_urn = encode_urn(storage_id);
    Mock::given(method("GET"))
        .and(path("/data/v1/projects/b.prj/items/i-1/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "type": "versions",
                "id": "v-1",
                "attributes": {},
                "relationships": { "storage": { "data": { "id": storage_id } } }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/modelderivative/v2/designdata/{expected_urn}/manifest"
        )))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let info = viewer_info(&client(&server), "t", "b.prj", "i-1")
        .await
        .unwrap();

    assert_eq!(info.urn, expected_urn);
    assert_eq!(info.data_type, "versions:unknown");
    assert!(!info.translated);
}

#[tokio::test]
async fn viewer_info_fails_without_versions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/v1/projects/b.prj/items/i-1/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let err = viewer_info(&client(&server), "t", "b.prj", "i-1")
        .await
        .unwrap_err();

    assert!(matches!(err, ViewableError::NoVersions(id) if id == "i-1"));
}

#[tokio::test]
async fn viewer_info_fails_without_storage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/v1/projects/b.prj/items/i-1/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "type": "versions", "id": "v-1", "attributes": {}, "relationships": {} }]
        })))
        .mount(&server)
        .await;

    let err = viewer_info(&client(&server), "t", "b.prj", "i-1")
        .await
        .unwrap_err();

    assert!(matches!(err, ViewableError::NoStorage(id) if id == "v-1"));
}

#[tokio::test]
async fn manifest_server_error_counts_as_not_ready() {
    let server = MockServer::start().await;
    mount_manifest(&server, ResponseTemplate::new(500)).await;

    let ready = is_viewable_ready(&client(&server), "t", URN).await.unwrap();

    assert!(!ready);
}

#[tokio::test]
async fn ready_manifest_skips_submission() {
    let server = MockServer::start().await;
    mount_manifest(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "derivatives": [{
                "outputType": "svf2",
                "children": [{ "role": "3d", "status": "success" }]
            }]
        })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = ensure_viewable_with_fallback(&client(&server), "t", &format!("urn:{URN}"), None)
        .await
        .unwrap();

    assert_eq!(outcome, EnsureOutcome::AlreadyReady);
}

#[tokio::test]
async fn fallback_stops_at_first_accepted_candidate() {
    let server = MockServer::start().await;
    mount_manifest(&server, ResponseTemplate::new(404)).await;
    Mock::given(method("POST"))
        .and(path(JOB_PATH))
        .and(body_partial_json(candidate("otg", "3d")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "success" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(406).set_body_string("unsupported"))
        .mount(&server)
        .await;

    let outcome = ensure_viewable_with_fallback(&client(&server), "t", URN, Some("us"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        EnsureOutcome::Submitted {
            format: OutputFormat::Otg,
            view: View::ThreeD
        }
    );
    assert_eq!(
        submitted_candidates(&server).await,
        vec![
            ("svf2".to_string(), "3d".to_string()),
            ("svf2".to_string(), "2d".to_string()),
            ("otg".to_string(), "3d".to_string()),
        ]
    );
}

#[tokio::test]
async fn fallback_tries_every_candidate_in_order() {
    let server = MockServer::start().await;
    mount_manifest(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "status": "inprogress" })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad format"))
        .mount(&server)
        .await;

    let err = ensure_viewable_with_fallback(&client(&server), "t", URN, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ViewableError::AllFormatsFailed { status: 400, ref body } if body == "bad format"
    ));
    let expected: Vec<(String, String)> = FALLBACK_ORDER
        .iter()
        .map(|(f, v)| (f.as_str().to_string(), v.as_str().to_string()))
        .collect();
    assert_eq!(
        expected,
        vec![
            ("svf2".to_string(), "3d".to_string()),
            ("svf2".to_string(), "2d".to_string()),
            ("otg".to_string(), "3d".to_string()),
            ("otg".to_string(), "2d".to_string()),
            ("svf".to_string(), "3d".to_string()),
            ("svf".to_string(), "2d".to_string()),
        ]
    );
    assert_eq!(submitted_candidates(&server).await, expected);
}

#[tokio::test]
async fn forbidden_aborts_fallback_immediately() {
    let server = MockServer::start().await;
    mount_manifest(&server, ResponseTemplate::new(404)).await;
    Mock::given(method("POST"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("data:write required"))
        .expect(1)
        .mount(&server)
        .await;

    let err = ensure_viewable_with_fallback(&client(&server), "t", URN, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ViewableError::Rejected { status: 403, .. }));
}

#[tokio::test]
async fn not_found_aborts_fallback_immediately() {
    let server = MockServer::start().await;
    mount_manifest(&server, ResponseTemplate::new(404)).await;
    Mock::given(method("POST"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = ensure_viewable_with_fallback(&client(&server), "t", URN, Some("emea"))
        .await
        .unwrap_err();

    assert!(matches!(err, ViewableError::Rejected { status: 404, .. }));
    assert_eq!(submitted_candidates(&server).await.len(), 1);
}
