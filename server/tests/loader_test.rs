//! Integration tests for the loader flow:
//! upload program -> create ephemeral route -> gated single-use delivery,
//! for both the direct and the VM variant.

use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use eaglehub_server::config::LoaderConfig;
use eaglehub_server::loader::envelope::{decode_layers, ENCODING_ROUNDS};
use eaglehub_server::loader::{EnvironmentProbe, LayeredBase64, StaticProbe};
use eaglehub_server::store::SqliteStore;

/// Helper: start the server on a random port and return the base URL.
async fn start_test_server(probe: Arc<dyn EnvironmentProbe>) -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = eaglehub_server::db::init_db(&data_dir).expect("Failed to init DB");

    let state = eaglehub_server::state::AppState {
        store: Arc::new(SqliteStore::new(db)),
        probe,
        wrapper: Arc::new(LayeredBase64::default()),
        loader: LoaderConfig::default(),
    };

    let app = eaglehub_server::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        // Keep tmp_dir alive so the data directory isn't deleted
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

async fn start_clean_server() -> String {
    start_test_server(Arc::new(StaticProbe(false))).await
}

/// Upload a script and issue a key; returns the key value.
async fn seed(client: &reqwest::Client, base: &str, code: &str, days: Option<i64>) -> String {
    let resp = client
        .put(format!("{}/api/loader/script", base))
        .json(&json!({ "code": code }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/keys", base))
        .json(&json!({ "hwid": "HW-1", "days": days }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["value"].as_str().unwrap().to_string()
}

async fn create_route(client: &reqwest::Client, base: &str, kind: &str) -> serde_json::Value {
    let resp = client
        .post(format!("{}/api/loader/routes", base))
        .json(&json!({ "kind": kind }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

fn delivery_url(base: &str, route: &serde_json::Value, key: &str, token: &str) -> String {
    format!(
        "{}{}?key={}&hwid=HW-1&token={}",
        base,
        route["path"].as_str().unwrap(),
        key,
        token
    )
}

/// Pull the layered payload out of a delivered stub and peel it.
fn extract_payload(body: &str) -> String {
    let marker = "local step3 = \"";
    let start = body.find(marker).expect("payload marker") + marker.len();
    let end = start + body[start..].find('"').expect("closing quote");
    decode_layers(&body[start..end], ENCODING_ROUNDS).expect("three base64 layers")
}

#[tokio::test]
async fn test_route_creation_response() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    seed(&client, &base, "print('hi')", None).await;

    let route = create_route(&client, &base, "script").await;
    let name = route["route_name"].as_str().unwrap();
    let token = route["token"].as_str().unwrap();

    assert_eq!(name.len(), 8);
    assert_eq!(token.len(), 32);
    assert_eq!(route["path"], format!("/{}", name));
    assert_eq!(route["expires_in"], 120);
    assert_eq!(route["single_use"], true);
    assert_eq!(
        route["url"],
        format!("/{}?key=YOUR_KEY&hwid=YOUR_HWID&token={}", name, token)
    );
}

#[tokio::test]
async fn test_route_creation_without_script_is_404() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/loader/routes", base))
        .json(&json!({ "kind": "script" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_single_use_delivery() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    let key = seed(&client, &base, "print('hello from eaglehub')", None).await;
    let route = create_route(&client, &base, "script").await;
    let url = delivery_url(&base, &route, &key, route["token"].as_str().unwrap());

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("loadstring(payload)()"));
    assert_eq!(extract_payload(&body), "print('hello from eaglehub')");

    // Consumed on first successful use
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "404 Not Found");
}

#[tokio::test]
async fn test_wrong_token_does_not_consume() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    let key = seed(&client, &base, "print(1)", None).await;
    let route = create_route(&client, &base, "script").await;

    let resp = client
        .get(delivery_url(&base, &route, &key, "deadbeef"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(resp.text().await.unwrap(), "Invalid token");

    let resp = client
        .get(delivery_url(&base, &route, &key, route["token"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_missing_and_invalid_key() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    seed(&client, &base, "print(1)", None).await;
    let route = create_route(&client, &base, "script").await;
    let token = route["token"].as_str().unwrap();

    let resp = client
        .get(format!(
            "{}{}?token={}",
            base,
            route["path"].as_str().unwrap(),
            token
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.text().await.unwrap(), "Missing key param");

    let resp = client
        .get(delivery_url(&base, &route, "NOT-A-KEY", token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(resp.text().await.unwrap(), "Invalid key");
}

#[tokio::test]
async fn test_revoked_key_is_rejected_immediately() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    let key = seed(&client, &base, "print(1)", Some(30)).await;

    let keys: serde_json::Value = client
        .get(format!("{}/api/keys", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = keys["keys"][0]["id"].as_str().unwrap().to_string();

    let resp = client
        .delete(format!("{}/api/keys/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let route = create_route(&client, &base, "script").await;
    let resp = client
        .get(delivery_url(&base, &route, &key, route["token"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(resp.text().await.unwrap(), "Invalid key");
}

#[tokio::test]
async fn test_kill_switch_blocks_delivery_not_creation() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    let key = seed(&client, &base, "print(1)", None).await;

    let resp = client
        .put(format!("{}/api/killswitch", base))
        .json(&json!({ "active": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let route = create_route(&client, &base, "script").await;
    let url = delivery_url(&base, &route, &key, route["token"].as_str().unwrap());

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(
        resp.text().await.unwrap(),
        "Kill Switch active. Scripts disabled."
    );

    // Not consumed: succeeds once the switch is released
    client
        .put(format!("{}/api/killswitch", base))
        .json(&json!({ "active": false }))
        .send()
        .await
        .unwrap();
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_blocked_address_is_refused() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    let key = seed(&client, &base, "print(1)", None).await;

    let resp = client
        .post(format!("{}/api/blocked", base))
        .json(&json!({ "ip_address": "127.0.0.1", "reason": "abuse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let route = create_route(&client, &base, "script").await;
    let resp = client
        .get(delivery_url(&base, &route, &key, route["token"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(
        resp.text().await.unwrap(),
        "You are banned from using this service."
    );
}

#[tokio::test]
async fn test_suspicious_environment() {
    let base = start_test_server(Arc::new(StaticProbe(true))).await;
    let client = reqwest::Client::new();
    seed(&client, &base, "print(1)", None).await;

    let resp = client
        .post(format!("{}/api/loader/routes", base))
        .json(&json!({ "kind": "script" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(
        resp.text().await.unwrap(),
        "Suspicious environment. Aborting ephemeral route creation."
    );
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/nosuchroute?key=k&token=t", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "404 Not Found");
}

#[tokio::test]
async fn test_vm_variant() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    let key = seed(&client, &base, "print(1)", None).await;

    // No program compiled yet
    let resp = client
        .post(format!("{}/api/loader/routes", base))
        .json(&json!({ "kind": "vm" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .put(format!("{}/api/loader/vm", base))
        .json(&json!({ "source": "x = 1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let program: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(program["bytecode"], "IDENT:eA==|ASSIGN:PQ==|NUMBER:MQ==");
    assert_eq!(program["instruction_count"], 3);
    assert_eq!(program["source_hash"].as_str().unwrap().len(), 64);

    let route = create_route(&client, &base, "vm").await;
    let name = route["route_name"].as_str().unwrap();
    assert_eq!(route["path"], format!("/avm/{}", name));

    // The direct variant does not know VM routes
    let resp = client
        .get(format!(
            "{}/{}?key={}&token={}",
            base,
            name,
            key,
            route["token"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(delivery_url(&base, &route, &key, route["token"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("vm_run(payload)"));
    assert_eq!(extract_payload(&body), "IDENT:eA==|ASSIGN:PQ==|NUMBER:MQ==");
}

#[tokio::test]
async fn test_vm_dry_run() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();

    client
        .put(format!("{}/api/loader/vm", base))
        .json(&json!({ "source": "1 2 + 10 *" }))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/api/loader/vm/dry-run", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(report["completed"], true);
    assert_eq!(report["stack"], json!([30.0]));
    assert!(report["error"].is_null());

    client
        .put(format!("{}/api/loader/vm", base))
        .json(&json!({ "source": "1 +" }))
        .send()
        .await
        .unwrap();
    let report: serde_json::Value = client
        .post(format!("{}/api/loader/vm/dry-run", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["completed"], false);
    assert!(report["error"].as_str().unwrap().contains("underflow"));
}

#[tokio::test]
async fn test_concurrent_uses_deliver_once() {
    let base = start_clean_server().await;
    let client = reqwest::Client::new();
    let key = seed(&client, &base, "print(1)", None).await;
    let route = create_route(&client, &base, "script").await;
    let url = delivery_url(&base, &route, &key, route["token"].as_str().unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            client.get(&url).send().await.unwrap().status().as_u16()
        }));
    }

    let mut statuses = Vec::new();
    for h in handles {
        statuses.push(h.await.unwrap());
    }
    assert_eq!(statuses.iter().filter(|s| **s == 200).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == 404).count(), 7);
}
