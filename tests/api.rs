use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use dolt_vc::api::routes::create_router;
use dolt_vc::config::VersionControlConfig;
use dolt_vc::store::TableSchema;
use dolt_vc::{MemoryEngine, VersionControl};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

// Test client wrapper driving the router in-process
struct TestClient {
    app: Router,
}

impl TestClient {
    fn new() -> Self {
        let engine = MemoryEngine::new("main");
        engine.define_table(
            "dcim_site",
            TableSchema::new(&["name", "status"]).with_unique(&["name"]),
        );
        engine.define_table("users_user", TableSchema::new(&["username"]));
        let vc = VersionControl::new(engine, &VersionControlConfig::default()).unwrap();
        Self {
            app: create_router().with_state(Arc::new(vc)),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        branch: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header("x-user-id", "u1")
            .header("x-user-name", "alice")
            .header("x-user-email", "alice@example.com");
        if let Some(branch) = branch {
            request = request.header("x-dolt-branch", branch);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(&self, path: &str, branch: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, path, branch, None).await
    }

    async fn post(&self, path: &str, branch: Option<&str>, json: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, branch, Some(json)).await
    }

    async fn put(&self, path: &str, branch: Option<&str>, json: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, path, branch, Some(json)).await
    }

    async fn delete(&self, path: &str, branch: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::DELETE, path, branch, None).await
    }
}

#[tokio::test]
async fn test_health() {
    let client = TestClient::new();
    let (status, body) = client.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_branch_lifecycle() {
    let client = TestClient::new();

    let (status, body) = client.post("/branches", None, json!({"name": "feature"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "feature");
    assert_eq!(body["starting_branch"], "main");
    assert_eq!(body["created_by"], "alice <alice@example.com>");

    let (status, _) = client.post("/branches", None, json!({"name": "feature"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = client.get("/branches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, _) = client.delete("/branches/main", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = client.delete("/branches/feature", Some("feature")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = client.delete("/branches/feature", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], json!(["feature"]));

    let (status, body) = client.get("/branches/feature", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("feature"));
}

#[tokio::test]
async fn test_entity_writes_follow_the_branch_header() {
    let client = TestClient::new();
    client.post("/branches", None, json!({"name": "feature"})).await;

    let (status, body) = client
        .put(
            "/entities/dcim/site/s1",
            Some("feature"),
            json!({"name": "ams01", "status": "active"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch"], "feature");
    assert_eq!(body["commits"].as_array().unwrap().len(), 1);

    let (status, body) = client.get("/entities/dcim/site/s1", Some("feature")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "ams01");
    let (status, _) = client.get("/entities/dcim/site/s1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = client.get("/branches/feature/commits?limit=1", None).await;
    assert_eq!(body["items"][0]["message"], "Created site \"ams01\"");
    assert_eq!(body["items"][0]["committer"], "alice");

    // an unknown branch header falls back to the primary branch
    let (status, body) = client
        .put("/entities/dcim/site/s9", Some("ghost"), json!({"name": "lon01"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch"], "main");

    let (status, _) = client.delete("/entities/dcim/site/s1", Some("feature")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = client.delete("/entities/dcim/site/s1", Some("feature")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_generates_ids() {
    let client = TestClient::new();
    let (status, body) = client.post("/entities/dcim/site", None, json!({"name": "ams01"})).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 36);

    let (status, body) = client.get(&format!("/entities/dcim/site/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "ams01");

    let (status, _) = client
        .post("/entities/dcim/site", None, json!({"id": "mine", "name": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_versioned_writes_need_primary_branch() {
    let client = TestClient::new();
    client.post("/branches", None, json!({"name": "feature"})).await;

    let (status, body) = client
        .put("/entities/users/user/1", Some("feature"), json!({"username": "alice"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("users.user"));

    let (status, _) = client
        .put("/entities/users/user/1", None, json!({"username": "alice"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    // readable from every branch
    let (status, _) = client.get("/entities/users/user/1", Some("feature")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = client
        .put("/entities/users/user/1", None, json!({"id": "2", "username": "bob"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_merge_preview_endpoints() {
    let client = TestClient::new();
    client
        .put("/entities/dcim/site/s1", None, json!({"name": "ams01", "status": "planned"}))
        .await;
    client.post("/branches", None, json!({"name": "feature"})).await;
    client
        .put(
            "/entities/dcim/site/s1",
            Some("feature"),
            json!({"name": "ams01", "status": "active"}),
        )
        .await;
    client
        .put("/entities/dcim/site/s1", None, json!({"name": "ams01", "status": "retired"}))
        .await;

    let (status, body) = client.get("/merge-preview/feature/main", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["summary"][0]["num_conflicts"], 1);
    assert_eq!(
        body["conflicts"][0]["conflicts"]["status"],
        json!({"main": "retired", "feature": "active", "base": "planned"})
    );

    let (status, body) = client.get("/merge-preview/feature/main/count", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conflicts"], 1);

    let (_, body) = client.get("/branches?include_candidates=true", None).await;
    assert_eq!(body["total"], 3);

    // nothing is stale yet
    let (_, body) = client.post("/merge-candidates/cleanup", None, json!({})).await;
    assert_eq!(body["deleted"], json!([]));

    let (status, _) = client.get("/merge-preview/ghost/main", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = client
        .post("/branches/main/merge", None, json!({"source": "feature"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("1 conflict"));
    let (_, site) = client.get("/entities/dcim/site/s1", None).await;
    assert_eq!(site["status"], "retired");
}

#[tokio::test]
async fn test_merging_a_branch() {
    let client = TestClient::new();
    client.post("/branches", None, json!({"name": "feature"})).await;
    client
        .put("/entities/dcim/site/s1", Some("feature"), json!({"name": "ams01"}))
        .await;
    client
        .put("/entities/dcim/site/s2", None, json!({"name": "lon01"}))
        .await;

    let (status, body) = client
        .post("/branches/main/merge", Some("feature"), json!({"source": "feature"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "main");

    let (status, site) = client.get("/entities/dcim/site/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(site["name"], "ams01");
    let (_, body) = client.get("/branches/main/commits?limit=1", None).await;
    assert_eq!(body["items"][0]["message"], "Merged branch \"feature\" into \"main\"");
    assert_eq!(body["items"][0]["committer"], "alice");

    let (status, _) = client
        .post("/branches/main/merge", None, json!({"source": "ghost"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
