//! HTTP API tests against a server backed by in-memory collections.

use std::sync::Arc;
use std::time::Duration;

use keepsake_server::config::Config;
use keepsake_server::{app, AppState, Stores};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let stores = Arc::new(Stores::in_memory());
        let state = AppState::new(Arc::clone(&stores), Config::default());
        stores.start().await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn patch(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.client.patch(self.url(path)).json(&body).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str) -> StatusCode {
        self.client.delete(self.url(path)).send().await.unwrap().status()
    }

    /// Poll `path` until `check` accepts the body.
    async fn get_until(&self, path: &str, check: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..200 {
            let (status, body) = self.get(path).await;
            if status == StatusCode::OK && check(&body) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("GET {path} never satisfied the check");
    }
}

#[tokio::test]
async fn health_and_root() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let text = reqwest::get(server.url("/")).await.unwrap().text().await.unwrap();
    assert_eq!(text, "Keepsake Server");
}

#[tokio::test]
async fn diary_entries_are_created_and_listed() {
    let server = TestServer::start().await;

    let (status, created) = server
        .post("/diary", json!({"title": "Picnic", "content": "Sunny, strawberries"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let entries = server
        .get_until("/diary", |body| body.as_array().is_some_and(|a| !a.is_empty()))
        .await;
    assert_eq!(entries[0]["id"], id.as_str());
    assert_eq!(entries[0]["mood"], "happy");
}

#[tokio::test]
async fn invalid_diary_entry_is_unprocessable() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/diary", json!({"title": "", "content": "text"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");

    let (status, _) = server
        .post("/diary", json!({"title": "a", "content": "b", "mood": "bored"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn wishlist_flow() {
    let server = TestServer::start().await;

    let (status, scarf) = server
        .post("/gifts", json!({"name": "Scarf", "category": "clothes"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let scarf = scarf["id"].as_str().unwrap().to_string();
    server.post("/gifts", json!({"name": "Lipstick", "category": "cosmetics"})).await;
    server.post("/gifts", json!({"name": "Mystery"})).await;

    let all = server.get_until("/gifts", |body| body["total"] == 3).await;
    assert_eq!(all["items"].as_array().unwrap().len(), 3);
    assert_eq!(all["counts"]["clothes"], 1);
    assert_eq!(all["counts"]["others"], 1);

    let (_, clothes) = server.get("/gifts?category=clothes").await;
    assert_eq!(clothes["items"].as_array().unwrap().len(), 1);
    assert_eq!(clothes["items"][0]["name"], "Scarf");
    assert_eq!(clothes["total"], 3);

    let (status, toggled) = server.post(&format!("/gifts/{scarf}/toggle"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["status"], "purchased");

    let (status, patched) = server
        .patch(&format!("/gifts/{scarf}"), json!({"note": "size M"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["note"], "size M");
    assert_eq!(patched["status"], "purchased");

    assert_eq!(server.delete(&format!("/gifts/{scarf}")).await, StatusCode::NO_CONTENT);
    let (_, after) = server.get("/gifts").await;
    assert_eq!(after["total"], 2);
}

#[tokio::test]
async fn wishlist_errors() {
    let server = TestServer::start().await;

    let (status, _) = server.get("/gifts?category=jewelry").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = server.patch("/gifts/missing", json!({"note": "x"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    assert_eq!(server.delete("/gifts/missing").await, StatusCode::NOT_FOUND);

    let (_, created) = server.post("/gifts", json!({"name": "Watch"})).await;
    let id = created["id"].as_str().unwrap().to_string();
    server.get_until("/gifts", |body| body["total"] == 1).await;

    let (status, _) = server
        .patch(&format!("/gifts/{id}"), json!({"status": "lost"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = server
        .patch(&format!("/gifts/{id}"), json!({"id": "other"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn flowers_and_redeeming() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/rewards/redeem", json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("insufficient balance"));

    let (status, _) = server
        .post("/rewards/flowers", json!({"note": "made dinner"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let summary = server.get_until("/rewards", |body| body["balance"] == 1).await;
    assert_eq!(summary["redeemed"], 0);
    assert_eq!(summary["history"][0]["action_type"], "add_flower");
    assert_eq!(summary["history"][0]["note"], "made dinner");

    let (status, _) = server.post("/rewards/redeem", json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (_, summary) = server.get("/rewards").await;
    assert_eq!(summary["balance"], 1);
}

#[tokio::test]
async fn reload_reports_the_count() {
    let server = TestServer::start().await;
    server.post("/diary", json!({"title": "a", "content": "b"})).await;

    let (status, body) = server.post("/diary/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collection"], "diary");
    assert_eq!(body["loaded"], 1);

    let (status, body) = server.post("/rewards/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collection"], "reward_actions");
}
