#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use drip_core::sequences::SequenceCatalog;
use drip_core::templates::TemplateLibrary;
use drip_core::types::{DbId, Timestamp};
use drip_db::models::enrollment::{CreateEnrollment, Enrollment, StepAdvance};
use drip_events::{DeliveryChannel, DeliveryError, DeliveryReceipt};
use drip_sequencer::{
    EngineSettings, EnrollmentStore, MemoryEnrollmentStore, SequenceEngine, StoreError,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use drip_api::config::ServerConfig;
use drip_api::router::build_app_router;
use drip_api::state::AppState;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Memory store that counts every call, so tests can assert that a request
/// never touched storage.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryEnrollmentStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EnrollmentStore for CountingStore {
    async fn create(&self, input: &CreateEnrollment) -> Result<Enrollment, StoreError> {
        self.hit();
        self.inner.create(input).await
    }

    async fn find_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.hit();
        self.inner.find_active(email, sequence_id).await
    }

    async fn find_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Enrollment>, StoreError> {
        self.hit();
        self.inner.find_due(now, limit).await
    }

    async fn list_for_email(
        &self,
        email: &str,
        sequence_id: Option<&str>,
    ) -> Result<Vec<Enrollment>, StoreError> {
        self.hit();
        self.inner.list_for_email(email, sequence_id).await
    }

    async fn advance(
        &self,
        id: DbId,
        expected_step: i32,
        advance: StepAdvance,
    ) -> Result<bool, StoreError> {
        self.hit();
        self.inner.advance(id, expected_step, advance).await
    }

    async fn cancel_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.hit();
        self.inner.cancel_active(email, sequence_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

/// Delivery channel that records messages and fails for chosen recipients.
#[derive(Default)]
pub struct ScriptedChannel {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn fail_for(&self, email: &str) {
        self.failing.lock().unwrap().push(email.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedChannel {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        _html: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if self.failing.lock().unwrap().iter().any(|f| f == to) {
            return Err(DeliveryError::Transport("mailbox unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(DeliveryReceipt {
            id: format!("<{to}@test>"),
        })
    }
}

// ---------------------------------------------------------------------------
// App builder
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(cron_secret: Option<&str>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        database_url: "postgres://unused".to_string(),
        cron_secret: cron_secret.map(str::to_string),
        production: false,
        tick_concurrency: 2,
        tick_batch_size: 100,
        sequence_catalog_path: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<CountingStore>,
    pub channel: Arc<ScriptedChannel>,
}

/// Full router (same middleware stack as production) over the built-in
/// catalog, an in-memory store and a scripted channel.
pub fn build_test_app(cron_secret: Option<&str>) -> TestApp {
    let config = test_config(cron_secret);
    let store = Arc::new(CountingStore::default());
    let channel = Arc::new(ScriptedChannel::default());

    let engine = SequenceEngine::new(
        store.clone(),
        channel.clone(),
        Arc::new(TemplateLibrary::builtin()),
        Arc::new(SequenceCatalog::builtin()),
        EngineSettings {
            concurrency: config.tick_concurrency,
            batch_size: config.tick_batch_size,
        },
    );
    let state = AppState {
        engine: Arc::new(engine),
        config: Arc::new(config.clone()),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        channel,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, None, Some(body)).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
