use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use inventory_server::{
    AppState, api, config::Config, inventory::Inventory, merge::ScopeLimits,
    store::InMemoryDataStore,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const TENANT: &str = "acme";
const MANAGEMENT: &str = "/api/management/v1/inventory";
const INTERNAL: &str = "/api/internal/v1/inventory";

fn app() -> Router {
    let inventory = Inventory::new(InMemoryDataStore::new(), ScopeLimits::default());
    api::router().with_state(AppState::new(inventory, &Config::default()))
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(api::HEADER_TENANT_ID, TENANT)
}

fn json_body(builder: axum::http::request::Builder, body: Value) -> Request<Body> {
    builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty(builder: axum::http::request::Builder) -> Request<Body> {
    builder.body(Body::empty()).unwrap()
}

async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

async fn add_device(app: &Router, id: &str, attributes: Value) {
    let response = send(
        app,
        json_body(
            request("POST", &format!("{INTERNAL}/tenants/{TENANT}/devices")),
            json!({ "id": id, "attributes": attributes }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn liveness_and_health() {
    let app = app();

    let response = send(&app, empty(request("GET", &format!("{INTERNAL}/alive")))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, empty(request("GET", &format!("{INTERNAL}/health")))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn tags_honour_if_match() {
    let app = app();
    add_device(&app, "dev-1", json!([])).await;
    let tags_uri = format!("{MANAGEMENT}/devices/dev-1/tags");

    let response = send(
        &app,
        json_body(
            request("PUT", &tags_uri),
            json!([{ "name": "owner", "value": "ops" }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let etag = header_str(&response, "etag").unwrap().to_string();

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/devices/dev-1"))),
    )
    .await;
    assert_eq!(header_str(&response, "etag"), Some(etag.as_str()));

    let response = send(
        &app,
        json_body(
            request("PATCH", &tags_uri).header(header::IF_MATCH, format!("\"{etag}\"")),
            json!([{ "name": "rack", "value": 4 }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(header_str(&response, "etag"), Some(etag.as_str()));

    let response = send(
        &app,
        json_body(
            request("PUT", &tags_uri)
                .header(header::IF_MATCH, etag.as_str())
                .header(api::HEADER_REQUEST_ID, "req-42"),
            json!([]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let body = read_json(response).await;
    assert_eq!(body["request_id"], "req-42");
    assert_eq!(body["error"], "ETag does not match");
}

#[tokio::test]
async fn listing_versions_differ_on_unscoped_keys() {
    let app = app();
    add_device(
        &app,
        "dev-1",
        json!([
            { "name": "os", "scope": "inventory", "value": "linux" },
            { "name": "mac", "scope": "identity", "value": "00:11:22:33:44:55" },
        ]),
    )
    .await;
    add_device(
        &app,
        "dev-2",
        json!([{ "name": "os", "scope": "inventory", "value": "zephyr" }]),
    )
    .await;

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/devices?os=linux"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-total-count"), Some("1"));
    let body = read_json(response).await;
    assert_eq!(body[0]["id"], "dev-1");

    let response = send(
        &app,
        empty(request("GET", "/api/management/v2/inventory/devices?os=linux")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        empty(request(
            "GET",
            "/api/management/v2/inventory/devices?identity/mac=eq:00:11:22:33:44:55",
        )),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-total-count"), Some("1"));

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/devices?per_page=0"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_membership() {
    let app = app();
    add_device(&app, "dev-1", json!([])).await;
    add_device(&app, "dev-2", json!([])).await;

    let response = send(
        &app,
        json_body(
            request("PUT", &format!("{MANAGEMENT}/devices/dev-1/group")),
            json!({ "group": "not valid" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        json_body(
            request("PATCH", &format!("{MANAGEMENT}/groups/prod/devices")),
            json!(["dev-1", "dev-2", "ghost"]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["matched_count"], 2);
    assert_eq!(body["updated_count"], 2);

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/groups/prod/devices?per_page=1"))),
    )
    .await;
    assert_eq!(header_str(&response, "x-total-count"), Some("2"));
    assert_eq!(read_json(response).await, json!(["dev-1"]));

    let response = send(
        &app,
        empty(request(
            "GET",
            &format!("{MANAGEMENT}/groups/prod/devices?page={}", usize::MAX),
        )),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-total-count"), Some("2"));
    assert_eq!(read_json(response).await, json!([]));

    let response = send(
        &app,
        empty(request("DELETE", &format!("{MANAGEMENT}/devices/dev-1/group/staging"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        empty(request("DELETE", &format!("{MANAGEMENT}/devices/dev-1/group/prod"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/devices/dev-1/group"))),
    )
    .await;
    assert_eq!(read_json(response).await, json!({ "group": null }));

    let response = send(&app, empty(request("GET", &format!("{MANAGEMENT}/groups")))).await;
    assert_eq!(read_json(response).await, json!(["prod"]));

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/groups/missing/devices"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_transitions() {
    let app = app();
    let status_uri = |status: &str| format!("{INTERNAL}/tenants/{TENANT}/devices/status/{status}");

    let response = send(
        &app,
        json_body(
            request("POST", &status_uri("active")),
            json!([{ "id": "dev-1", "revision": 1 }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        json_body(
            request("POST", &status_uri("accepted")),
            json!([{ "id": "dev-1", "revision": 2 }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["updated_count"], 1);

    let response = send(
        &app,
        json_body(
            request("POST", &status_uri("rejected")),
            json!([{ "id": "dev-1", "revision": 1 }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(
        &app,
        json_body(
            request("POST", &status_uri("decommissioned")),
            json!([{ "id": "dev-1", "revision": 3 }]),
        ),
    )
    .await;
    assert_eq!(read_json(response).await["deleted_count"], 1);
}

#[tokio::test]
async fn management_delete_clears_inventory_only() {
    let app = app();
    add_device(
        &app,
        "dev-1",
        json!([
            { "name": "mac", "scope": "identity", "value": "aa" },
            { "name": "os", "scope": "inventory", "value": "linux" },
        ]),
    )
    .await;

    let response = send(
        &app,
        empty(request("DELETE", &format!("{MANAGEMENT}/devices/dev-1"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/devices/dev-1"))),
    )
    .await;
    let body = read_json(response).await;
    assert_eq!(body["attributes"].as_array().unwrap().len(), 1);
    assert_eq!(body["attributes"][0]["scope"], "identity");

    let response = send(
        &app,
        empty(request("DELETE", &format!("{MANAGEMENT}/devices/ghost"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn device_reports_inventory() {
    let app = app();
    let uri = "/api/devices/v1/inventory/device/attributes";

    let response = send(
        &app,
        json_body(request("PATCH", uri), json!([{ "name": "os", "value": "linux" }])),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &app,
        json_body(
            request("PATCH", uri).header(api::HEADER_DEVICE_ID, "dev-1"),
            json!([
                { "name": "os", "value": "linux" },
                { "name": "cpus", "value": 4 },
            ]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        json_body(
            request("PUT", uri).header(api::HEADER_DEVICE_ID, "dev-1"),
            json!([{ "name": "os", "value": "linux" }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/devices/dev-1"))),
    )
    .await;
    let body = read_json(response).await;
    assert_eq!(body["attributes"].as_array().unwrap().len(), 1);
    assert_eq!(body["attributes"][0]["name"], "os");
    assert_eq!(body["attributes"][0]["scope"], "inventory");
}

#[tokio::test]
async fn internal_scope_writes_and_reindex() {
    let app = app();
    add_device(&app, "dev-1", json!([])).await;

    let response = send(
        &app,
        json_body(
            request(
                "PATCH",
                &format!("{INTERNAL}/tenants/{TENANT}/device/dev-1/attribute/scope/bogus"),
            ),
            json!([]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        json_body(
            request(
                "PATCH",
                &format!("{INTERNAL}/tenants/{TENANT}/device/dev-1/attribute/scope/system"),
            ),
            json!([{ "name": "geo", "value": "eu-west" }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let reindex = format!("{INTERNAL}/tenants/{TENANT}/devices/dev-1/reindex");
    let response = send(&app, empty(request("POST", &reindex))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, empty(request("POST", &format!("{reindex}?service=foo")))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // no device monitor is configured
    let response = send(
        &app,
        empty(request("POST", &format!("{reindex}?service=devicemonitor"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_json(response).await["error"], "internal error");
}

#[tokio::test]
async fn source_patches_reject_older_messages() {
    let app = app();
    let uri = format!("/api/internal/v2/inventory/devices/dev-1?tenant_id={TENANT}");
    let patch = |timestamp: &str, value: &str| {
        json_body(
            Request::builder()
                .method("PATCH")
                .uri(&uri)
                .header(api::HEADER_SOURCE, "deviceconnect")
                .header(api::HEADER_MSG_TIMESTAMP, timestamp),
            json!([{ "name": "connected", "scope": "monitor", "value": value }]),
        )
    };

    let response = send(&app, patch("1700000000200", "true")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, patch("1700000000100", "false")).await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let response = send(&app, patch("yesterday", "false")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        json_body(
            Request::builder().method("PATCH").uri(&uri),
            json!([{ "name": "connected", "scope": "monitor", "value": "false" }]),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        empty(request("GET", &format!("{MANAGEMENT}/devices/dev-1"))),
    )
    .await;
    let body = read_json(response).await;
    let connected = body["attributes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|attr| attr["name"] == "connected")
        .unwrap()
        .clone();
    assert_eq!(connected["value"], "true");
}
