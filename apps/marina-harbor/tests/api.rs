//! HTTP surface test over in-memory stores and stub collaborators. The
//! Redis-backed path is covered by `redis_roundtrip` below, which is ignored
//! by default; export `REDIS_URL` and run with `-- --ignored` to exercise it.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use marina_core::{
    credential::encode_for_identity, Cooldowns, CoordinatorConfig, HostingCoordinator,
    LaunchError, LivenessOracle, MemoryAccessPolicy, MemoryOwnershipLedger, MemorySettingsStore,
    OracleError, PolicyGate, WorkerLauncher, WorkerProcess, WorkerRegistry, WorkerState,
    WorkerStatus,
};
use serde_json::Value;
use tower::ServiceExt;

use marina_harbor::handlers::build_router;

struct AlwaysLiveOracle;

#[async_trait]
impl LivenessOracle for AlwaysLiveOracle {
    async fn confirm(&self, _credential: &str) -> Result<bool, OracleError> {
        Ok(true)
    }
}

struct StubProcess;

#[async_trait]
impl WorkerProcess for StubProcess {
    async fn stop(&mut self) -> Result<(), LaunchError> {
        Ok(())
    }
    async fn status(&mut self) -> WorkerStatus {
        WorkerStatus {
            state: WorkerState::Running,
            guild_count: 1,
            presence: None,
        }
    }
}

struct StubLauncher;

#[async_trait]
impl WorkerLauncher for StubLauncher {
    async fn start(&self, _credential: &str) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        Ok(Box::new(StubProcess))
    }
}

async fn test_app() -> (Router, Arc<MemoryAccessPolicy>) {
    let policy = Arc::new(MemoryAccessPolicy::new());
    let ledger = Arc::new(MemoryOwnershipLedger::new());
    let coordinator = Arc::new(HostingCoordinator::new(
        Arc::new(AlwaysLiveOracle),
        PolicyGate::new(policy.clone(), ledger.clone()),
        Arc::new(MemorySettingsStore::new()),
        ledger,
        WorkerRegistry::new(Arc::new(StubLauncher), Duration::from_secs(5)),
        CoordinatorConfig {
            cooldowns: Cooldowns::disabled(),
            ..CoordinatorConfig::default()
        },
    ));
    (build_router(coordinator), policy)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn host_request(requester: u64, credential: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/hosted")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "requester": requester, "credential": credential }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn host_list_unhost_flow() {
    let (app, policy) = test_app().await;
    policy.authorize(1, None).await;
    let credential = encode_for_identity(10, "Gx01aB.integration");

    // Host a new account.
    let response = app
        .clone()
        .oneshot(host_request(1, &credential))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["uid"], 1);
    assert_eq!(body["updated"], false);

    // The listing shows the hosted account with live worker status.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/hosted?requester=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["accounts"][0]["identity"], 10);
    assert_eq!(body["accounts"][0]["status"], "online");

    // The credential is revealed only to the owner.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/hosted/1/credential?requester=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["credential"], credential);

    // Unhost by uid; the listing is empty afterwards.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/hosted/1?requester=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/hosted?requester=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn rejections_map_to_http_statuses() {
    let (app, policy) = test_app().await;

    // Unauthorized requester.
    let credential = encode_for_identity(10, "Gx01aB.integration");
    let response = app
        .clone()
        .oneshot(host_request(9, &credential))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "unauthorized");

    // Malformed credential.
    policy.authorize(1, None).await;
    let response = app
        .clone()
        .oneshot(host_request(1, "not-a-credential"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "validation_failed");

    // Unknown identifier on unhost.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/hosted/xyz?requester=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn quota_rejection_reports_conflict() {
    let (app, policy) = test_app().await;
    policy.authorize(1, Some(1)).await;

    let first = encode_for_identity(10, "Gx01aB.integration");
    let second = encode_for_identity(11, "Gx01aB.integration");
    let response = app.clone().oneshot(host_request(1, &first)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(host_request(1, &second)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "quota_exceeded");
}

#[tokio::test]
async fn revalidate_reports_a_sweep() {
    let (app, policy) = test_app().await;
    policy.authorize(1, None).await;
    let credential = encode_for_identity(10, "Gx01aB.integration");
    app.clone()
        .oneshot(host_request(1, &credential))
        .await
        .unwrap();

    // Oracle always reports live here, so the sweep removes nothing.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/hosted/revalidate")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({ "requester": 1 }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checked"], 1);
    assert_eq!(body["removed"].as_array().unwrap().len(), 0);
}

// End-to-end persistence check against a real Redis instance.
#[ignore]
#[tokio::test]
async fn redis_roundtrip() {
    use chrono::Utc;
    use marina_core::{AccountSettings, AutoDeletePolicy, OwnershipLedger, SettingsStore};
    use marina_harbor::storage::RedisStorage;

    let redis_url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for this test");
    let storage = RedisStorage::new(&redis_url).await.expect("connect to redis");

    let uid = storage.next_uid().await.expect("allocate uid");
    let later = storage.next_uid().await.expect("allocate uid");
    assert!(later > uid);

    let credential = encode_for_identity(424242, "Gx01aB.redis-roundtrip");
    let settings = AccountSettings {
        uid,
        identity: 424242,
        username: "redis-roundtrip".into(),
        command_prefix: ";".into(),
        auto_delete: AutoDeletePolicy::default(),
        presence: serde_json::Value::Null,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    SettingsStore::upsert(&storage, &credential, settings)
        .await
        .expect("upsert settings");
    let (stored_cred, stored) = storage
        .get_by_identity(424242)
        .await
        .expect("lookup settings")
        .expect("settings present");
    assert_eq!(stored_cred, credential);
    assert_eq!(stored.uid, uid);

    OwnershipLedger::upsert(&storage, 1, 424242, &credential)
        .await
        .expect("upsert ownership");
    assert_eq!(storage.count_by_requester(1).await.expect("count"), 1);
    assert!(OwnershipLedger::remove(&storage, 1, 424242)
        .await
        .expect("remove ownership"));
    SettingsStore::remove(&storage, &credential)
        .await
        .expect("remove settings");
}
