// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for driving the contact gatekeeper router.
//!
//! Provides in-memory wiring of the service, a builder for contact form
//! requests, and local mock servers standing in for the CAPTCHA and mail
//! APIs.

#![allow(dead_code)]

pub mod mocks;
pub mod requests;

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use contact_gatekeeper::{
    config::Config,
    handlers::{router, AppState},
    notify::Notifier,
    store::{KvStore, MemoryStore, Stores},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const ADMIN_KEY: &str = "admin-test-key";

/// Configuration with timing checks disabled, an admin key set and the
/// loopback proxy trusted.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.trusted_proxies = vec!["127.0.0.1".to_string()];
    config.rate_limit.min_interval_ms = 0;
    config.admin.api_key = Some(ADMIN_KEY.to_string());
    config
}

/// A wired service plus handles on its stores.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub rate_limit: Arc<MemoryStore>,
    pub backup: Arc<MemoryStore>,
}

impl TestApp {
    /// Service with separate in-memory rate-limit and backup stores.
    pub fn new(config: Config, notifier: Option<Arc<dyn Notifier>>) -> Self {
        let rate_limit = Arc::new(MemoryStore::new(1000));
        let backup = Arc::new(MemoryStore::new(1000));
        let stores = Stores {
            rate_limit: Some(rate_limit.clone() as Arc<dyn KvStore>),
            backup: Some(backup.clone() as Arc<dyn KvStore>),
            local: vec![rate_limit.clone(), backup.clone()],
        };
        let state = Arc::new(AppState::new(config, stores, notifier).unwrap());

        Self {
            router: router(state.clone()),
            state,
            rate_limit,
            backup,
        }
    }

    /// Service over arbitrary store bindings.
    pub fn with_stores(
        config: Config,
        stores: Stores,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Router {
        router(Arc::new(AppState::new(config, stores, notifier).unwrap()))
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        send(&self.router, request).await
    }

    /// Whether nothing was written to the backup store.
    pub async fn nothing_backed_up(&self) -> bool {
        self.backup.is_empty().await
    }
}

/// Status, headers and JSON body of a response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub text: String,
}

/// Send one request through the router.
pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    TestResponse {
        status,
        headers,
        body,
        text,
    }
}

/// Plain GET request.
pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// The body every accepted or concealed submission answers with.
pub fn is_success_body(body: &Value) -> bool {
    body["success"] == Value::Bool(true)
        && body["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("Ihre Nachricht wurde erfolgreich gesendet"))
}
