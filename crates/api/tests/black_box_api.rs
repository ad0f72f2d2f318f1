use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use almoner_api::app::{AppServices, build_app};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over in-memory stores, bound to an ephemeral port.
        let app = build_app(Arc::new(AppServices::in_memory()), 1024 * 1024);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn tomorrow() -> String {
    (Utc::now().date_naive() + ChronoDuration::days(1)).to_string()
}

async fn post_json(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let res = client.post(url).json(&body).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap_or(Value::Null))
}

async fn patch_json(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let res = client.patch(url).json(&body).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap_or(Value::Null))
}

async fn get_json(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let res = client.get(url).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap_or(Value::Null))
}

/// Warehouse "Central" with `quantity` units of Rice; returns (warehouse id, product id).
async fn seed_stock(server: &TestServer, client: &reqwest::Client, quantity: i64) -> (String, String) {
    let (status, warehouse) =
        post_json(client, server.url("/warehouse"), json!({ "name": "Central" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let warehouse_id = warehouse["id"].as_str().unwrap().to_string();

    let (status, product) = post_json(
        client,
        server.url(&format!("/warehouse/{warehouse_id}/product")),
        json!({ "name": "Rice", "quantity": quantity }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (warehouse_id, product["id"].as_str().unwrap().to_string())
}

async fn seed_family(server: &TestServer, client: &reqwest::Client) -> String {
    let (status, family) = post_json(
        client,
        server.url("/family"),
        json!({
            "phone": "600100200",
            "members": [{
                "name": "Ana",
                "surname": "Lopez",
                "national_id": "12345678z",
                "gender": "female",
                "family_head": true
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    family["id"].as_str().unwrap().to_string()
}

async fn rice_on_hand(server: &TestServer, client: &reqwest::Client, warehouse_id: &str) -> i64 {
    let (status, warehouse) = get_json(client, server.url(&format!("/warehouse/{warehouse_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    warehouse["products"][0]["quantity"].as_i64().unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn delivery_lifecycle_moves_stock() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (warehouse_id, product_id) = seed_stock(&server, &client, 10).await;
    let family_id = seed_family(&server, &client).await;

    let (status, delivery) = post_json(
        &client,
        server.url("/delivery"),
        json!({
            "delivery_date": tomorrow(),
            "months": 1,
            "family_id": family_id,
            "lines": [{ "product_id": product_id, "quantity": 4 }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{delivery}");
    assert_eq!(delivery["state"], "NEXT");
    assert_eq!(delivery["family"]["phone"], "600100200");
    assert_eq!(rice_on_hand(&server, &client, &warehouse_id).await, 6);
    let delivery_id = delivery["id"].as_str().unwrap().to_string();

    // Growing the line only takes the difference.
    let (status, _) = patch_json(
        &client,
        server.url(&format!("/delivery/{delivery_id}")),
        json!({ "lines": [{ "product_id": product_id, "quantity": 7 }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rice_on_hand(&server, &client, &warehouse_id).await, 3);

    let (status, listed) = get_json(
        &client,
        server.url(&format!("/delivery?family_id={family_id}&state=NEXT")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);

    let (status, by_family) =
        get_json(&client, server.url(&format!("/delivery/family/{family_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_family.as_array().unwrap().len(), 1);

    let res = client
        .delete(server.url(&format!("/delivery/{delivery_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(rice_on_hand(&server, &client, &warehouse_id).await, 10);
}

#[tokio::test]
async fn delivered_deliveries_are_frozen_until_reopened() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (warehouse_id, product_id) = seed_stock(&server, &client, 10).await;
    let family_id = seed_family(&server, &client).await;

    let (_, delivery) = post_json(
        &client,
        server.url("/delivery"),
        json!({
            "delivery_date": tomorrow(),
            "months": 1,
            "family_id": family_id,
            "lines": [{ "product_id": product_id, "quantity": 2 }]
        }),
    )
    .await;
    let url = server.url(&format!("/delivery/{}", delivery["id"].as_str().unwrap()));

    let (status, _) = patch_json(&client, url.clone(), json!({ "state": "DELIVERED" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = patch_json(&client, url.clone(), json!({ "months": 2 })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, reopened) =
        patch_json(&client, url.clone(), json!({ "state": "NEXT", "months": 2 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reopened["months"], 2);
    assert_eq!(rice_on_hand(&server, &client, &warehouse_id).await, 8);
}

#[tokio::test]
async fn insufficient_stock_is_rejected_without_moving_anything() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (warehouse_id, product_id) = seed_stock(&server, &client, 3).await;
    let family_id = seed_family(&server, &client).await;

    let (status, body) = post_json(
        &client,
        server.url("/delivery"),
        json!({
            "delivery_date": tomorrow(),
            "months": 1,
            "family_id": family_id,
            "lines": [{ "product_id": product_id, "quantity": 5 }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("stock"));
    assert_eq!(rice_on_hand(&server, &client, &warehouse_id).await, 3);
}

#[tokio::test]
async fn errors_use_the_json_error_shape() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, server.url("/delivery/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");

    let missing = uuid_like();
    let (status, body) = get_json(&client, server.url(&format!("/family/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let res = client
        .post(server.url("/warehouse"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_body");

    let (status, body) = get_json(&client, server.url("/delivery?state=LOST")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

fn uuid_like() -> &'static str {
    "01890a5d-ac96-774b-bcce-b302099a8057"
}

#[tokio::test]
async fn duplicate_natural_keys_conflict() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    seed_stock(&server, &client, 1).await;
    let (status, _) = post_json(&client, server.url("/warehouse"), json!({ "name": "Central" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let patient = json!({
        "name": "Luis",
        "surname": "Gomez",
        "national_id": "X1",
        "gender": "male"
    });
    let (status, _) = post_json(&client, server.url("/patient"), patient.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = post_json(&client, server.url("/patient"), patient).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, listed) = get_json(&client, server.url("/patient?skip=0&limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);
}

#[tokio::test]
async fn family_contact_changes_reach_their_deliveries() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (_, product_id) = seed_stock(&server, &client, 5).await;
    let family_id = seed_family(&server, &client).await;
    post_json(
        &client,
        server.url("/delivery"),
        json!({
            "delivery_date": tomorrow(),
            "months": 1,
            "family_id": family_id,
            "lines": [{ "product_id": product_id, "quantity": 1 }]
        }),
    )
    .await;

    let (status, _) = patch_json(
        &client,
        server.url(&format!("/family/{family_id}")),
        json!({ "phone": "699000111" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, deliveries) =
        get_json(&client, server.url(&format!("/delivery/family/{family_id}"))).await;
    assert_eq!(deliveries[0]["family"]["phone"], "699000111");
}

#[tokio::test]
async fn uploads_must_be_xlsx_in_the_file_field() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let csv = reqwest::multipart::Part::bytes(b"name,surname\n".to_vec()).file_name("patients.csv");
    let res = client
        .post(server.url("/patient/excel"))
        .multipart(reqwest::multipart::Form::new().part("file", csv))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(server.url("/family/excel"))
        .multipart(reqwest::multipart::Form::new().text("other", "x"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_upload");
}
