// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Stand-ins for outbound collaborators.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use contact_gatekeeper::{
    notify::{EmailMessage, Notifier, NotifyError},
    store::{KvStore, StoreError},
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Token the mock challenge API accepts.
pub const VALID_TOKEN: &str = "valid-token";

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Challenge API accepting only [`VALID_TOKEN`]; returns the verify URL.
pub async fn spawn_turnstile() -> String {
    async fn siteverify(Json(body): Json<Value>) -> Json<Value> {
        let success = body["response"] == VALID_TOKEN && body["secret"].is_string();
        if success {
            Json(json!({ "success": true }))
        } else {
            Json(json!({ "success": false, "error-codes": ["invalid-input-response"] }))
        }
    }

    let base = spawn_server(Router::new().route("/siteverify", post(siteverify))).await;
    format!("{base}/siteverify")
}

/// Requests received by the mock mail API.
pub type MailLog = Arc<Mutex<Vec<Value>>>;

/// Mail API answering with `status`; returns the endpoint URL and the log
/// of received bodies.
pub async fn spawn_resend(status: StatusCode) -> (String, MailLog) {
    async fn emails(
        State((status, log)): State<(StatusCode, MailLog)>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        log.lock().unwrap().push(body);
        if status.is_success() {
            (status, Json(json!({ "id": "msg_0001" })))
        } else {
            (status, Json(json!({ "message": "Invalid API key" })))
        }
    }

    let log = MailLog::default();
    let app = Router::new()
        .route("/emails", post(emails))
        .with_state((status, log.clone()));
    let base = spawn_server(app).await;
    (format!("{base}/emails"), log)
}

/// Notifier recording every message it is asked to send.
#[derive(Default)]
pub struct StubNotifier {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub fail: bool,
}

impl StubNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for StubNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<String, NotifyError> {
        if self.fail {
            return Err(NotifyError::Timeout);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok("stub".to_string())
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn kind(&self) -> &'static str {
        "failing"
    }
}
