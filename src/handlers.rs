// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the contact gatekeeper service.

use crate::backup::BackupStore;
use crate::config::{Config, ConfigError, StoreBackend};
use crate::error::{Disclosure, Rejection};
use crate::gatekeeper::{ClientInfo, GateOutcome, SubmissionGatekeeper};
use crate::metrics::Metrics;
use crate::models::{record_id, BackupRecord};
use crate::notify::Notifier;
use crate::redirect::{redirect_apex, HostRedirect};
use crate::store::{StoreError, Stores};
use crate::validator::ContactFields;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        ConnectInfo, FromRequest, Multipart, Query, Request, State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, warn};

/// Upper bound for a url-encoded form body.
const FORM_BODY_LIMIT: usize = 256 * 1024;

const SUCCESS_MESSAGE: &str =
    "Ihre Nachricht wurde erfolgreich gesendet. Wir melden uns kurzfristig bei Ihnen.";
const CRITICAL_MESSAGE: &str =
    "Ihre Nachricht konnte leider nicht übermittelt werden. Bitte rufen Sie uns direkt an.";
const INTERNAL_ERROR_MESSAGE: &str =
    "Ein Fehler ist aufgetreten. Bitte versuchen Sie es später erneut.";

/// Shared application state.
pub struct AppState {
    pub gatekeeper: SubmissionGatekeeper,
    pub backups: Option<BackupStore>,
    pub stores: Stores,
    pub metrics: Metrics,
    pub proxies: TrustedProxies,
    pub config: Config,
}

impl AppState {
    /// Wire the service from configuration, store bindings and an optional
    /// notifier.
    pub fn new(
        config: Config,
        stores: Stores,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self, ConfigError> {
        let gatekeeper = SubmissionGatekeeper::new(&config, &stores, notifier)?;
        let backups = stores
            .backup
            .clone()
            .map(|store| BackupStore::new(store, config.backup.retention()));

        Ok(Self {
            gatekeeper,
            backups,
            stores,
            metrics: Metrics::new()?,
            proxies: TrustedProxies::new(config.trusted_networks()?),
            config,
        })
    }

    /// Drop expired entries from in-process stores.
    pub async fn purge_expired(&self) -> usize {
        let fallback = self.gatekeeper.limiter().fallback();
        self.stores.purge_expired().await + fallback.purge_expired().await
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_minutes: Option<u64>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            wait_minutes: None,
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}

/// Body of a successful (or concealed) submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
}

impl SubmitResponse {
    fn success(backup_id: Option<String>) -> Self {
        Self {
            success: true,
            message: SUCCESS_MESSAGE,
            backup_id,
        }
    }
}

impl IntoResponse for GateOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Accepted { backup_id, .. } => {
                (StatusCode::OK, Json(SubmitResponse::success(backup_id))).into_response()
            }
            Self::Rejected(rejection) => rejection.into_response(),
            Self::CriticalFailure => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, CRITICAL_MESSAGE)
            }
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        if self.disclosure() == Disclosure::Conceal {
            // Same shape as a stored submission; the id refers to nothing.
            let decoy = record_id(Utc::now());
            return (StatusCode::OK, Json(SubmitResponse::success(Some(decoy)))).into_response();
        }

        let status = self.status_code();
        match &self {
            Self::RateLimited { wait_minutes } => (
                status,
                [(header::RETRY_AFTER, (wait_minutes * 60).to_string())],
                Json(ErrorResponse {
                    error: self.to_string(),
                    wait_minutes: Some(*wait_minutes),
                }),
            )
                .into_response(),
            _ => error_response(status, self.to_string()),
        }
    }
}

/// A request body that could not be read as a form.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("Unsupported content type: {0:?}")]
    UnsupportedContentType(Option<String>),

    #[error("Invalid multipart request: {0}")]
    MultipartRejection(#[from] MultipartRejection),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Failed to read body: {0}")]
    Body(#[from] axum::Error),
}

/// Read contact form fields from a multipart or url-encoded body.
pub async fn read_form(request: Request) -> Result<ContactFields, FormError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);

    match content_type.as_deref() {
        Some(ct) if ct.starts_with("multipart/form-data") => {
            let mut multipart = Multipart::from_request(request, &()).await?;
            let mut pairs = Vec::new();
            while let Some(field) = multipart.next_field().await? {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                pairs.push((name, field.text().await?));
            }
            Ok(ContactFields::from_pairs(pairs))
        }
        Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
            let body = axum::body::to_bytes(request.into_body(), FORM_BODY_LIMIT).await?;
            Ok(ContactFields::from_pairs(url::form_urlencoded::parse(&body)))
        }
        _ => Err(FormError::UnsupportedContentType(content_type.clone())),
    }
}

/// Peers allowed to report the client address in proxy headers.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNet>,
}

impl TrustedProxies {
    pub fn new(networks: Vec<IpNet>) -> Self {
        Self { networks }
    }

    pub fn trusts(&self, addr: IpAddr) -> bool {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
            v4 => v4,
        };
        self.networks.iter().any(|net| net.contains(&addr))
    }
}

/// Determine the client address and User-Agent.
///
/// `CF-Connecting-IP` and then the first `X-Forwarded-For` entry are used
/// only when the peer is a trusted proxy. Any other peer is keyed on its
/// socket address.
pub fn client_info(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    proxies: &TrustedProxies,
) -> ClientInfo {
    let forwarded = || {
        header_str(headers, "cf-connecting-ip")
            .map(str::to_string)
            .or_else(|| {
                header_str(headers, "x-forwarded-for")
                    .and_then(|list| list.split(',').next())
                    .map(|ip| ip.trim().to_string())
                    .filter(|ip| !ip.is_empty())
            })
    };

    let ip = match peer {
        Some(addr) if proxies.trusts(addr.ip()) => {
            forwarded().unwrap_or_else(|| addr.ip().to_string())
        }
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    };

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    ClientInfo { ip, user_agent }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `POST /api/contact`
pub async fn contact(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let client = client_info(
        request.headers(),
        peer.map(|ConnectInfo(addr)| addr),
        &state.proxies,
    );
    debug!(ip = %client.ip, "Processing contact submission");

    let outcome = match state.gatekeeper.screen(&client).await {
        Err(rejection) => GateOutcome::Rejected(rejection),
        Ok(()) => match read_form(request).await {
            Ok(fields) => state.gatekeeper.submit(&client, &fields).await,
            Err(err) => {
                error!(ip = %client.ip, error = %err, "Failed to read contact form");
                state.metrics.record_submission("malformed");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE);
            }
        },
    };

    state.metrics.record_submission(outcome.label());
    outcome.into_response()
}

/// Query of the admin endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ContactsQuery {
    pub key: Option<String>,
    pub id: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContactResponse {
    contact: BackupRecord,
}

#[derive(Debug, Serialize)]
struct DateListing {
    date: String,
    count: usize,
    contacts: Vec<BackupRecord>,
}

#[derive(Debug, Serialize)]
struct RecentListing {
    period: &'static str,
    count: usize,
    contacts: Vec<BackupRecord>,
}

/// `GET /api/contacts?key=&id=&date=`
pub async fn contacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContactsQuery>,
) -> Response {
    let Some(expected) = state.config.admin.api_key.as_deref() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "API not configured");
    };
    if !key_matches(query.key.as_deref(), expected) {
        warn!("Rejected admin request with missing or wrong key");
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    let Some(backups) = &state.backups else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "KV not configured");
    };

    let result = if let Some(id) = query.id.as_deref() {
        match backups.get(id).await {
            Ok(Some(contact)) => Ok(Json(ContactResponse { contact }).into_response()),
            Ok(None) | Err(StoreError::Serialization(_)) => {
                Ok(error_response(StatusCode::NOT_FOUND, "Contact not found"))
            }
            Err(err) => Err(err),
        }
    } else if let Some(date) = query.date.as_deref() {
        let Ok(day) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
            return error_response(StatusCode::BAD_REQUEST, "Invalid date");
        };
        backups.list_for_date(day).await.map(|contacts| {
            Json(DateListing {
                date: date.to_string(),
                count: contacts.len(),
                contacts,
            })
            .into_response()
        })
    } else {
        let today = Utc::now().date_naive();
        backups
            .list_recent(today, state.config.backup.listing_days)
            .await
            .map(|contacts| {
                Json(RecentListing {
                    period: "last_7_days",
                    count: contacts.len(),
                    contacts,
                })
                .into_response()
            })
    };

    result.unwrap_or_else(|err| {
        error!(error = %err, "Contacts API error");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    })
}

/// Compare a supplied key with the configured one in constant time.
fn key_matches(provided: Option<&str>, expected: &str) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let (left, right) = (provided.as_bytes(), expected.as_bytes());
    if left.len() != right.len() {
        return false;
    }
    let mut mismatch = 0u8;
    for (l, r) in left.iter().zip(right.iter()) {
        mismatch |= l ^ r;
    }
    mismatch == 0
}

/// Query of the health endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    pub key: Option<String>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    pub services: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<HealthStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigStatus>,
}

/// Which collaborators are configured.
#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub email: bool,
    pub captcha: bool,
    pub backup: bool,
}

/// Submission statistics, admin only.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum HealthStats {
    Counts { contacts_today: usize },
    Unavailable { error: &'static str },
}

/// Configuration flags, admin only.
#[derive(Debug, Serialize)]
pub struct ConfigStatus {
    pub email_configured: bool,
    pub turnstile_configured: bool,
    pub kv_backup_configured: bool,
    pub kv_ratelimit_configured: bool,
}

/// `GET /api/health?key=`
pub async fn health(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HealthQuery>,
) -> Response {
    let config = &state.config;
    let services = ServiceStatus {
        email: config.email.api_key.is_some(),
        captcha: config.captcha.secret_key.is_some(),
        backup: state.backups.is_some(),
    };
    let ok = services.email && services.backup;

    let authorized = config
        .admin
        .api_key
        .as_deref()
        .is_some_and(|expected| key_matches(query.key.as_deref(), expected));

    let (stats, config_status) = if authorized {
        let stats = match &state.backups {
            Some(backups) => Some(
                match backups.count_for_date(Utc::now().date_naive()).await {
                    Ok(contacts_today) => HealthStats::Counts { contacts_today },
                    Err(err) => {
                        warn!(error = %err, "Could not fetch stats");
                        HealthStats::Unavailable {
                            error: "Could not fetch stats",
                        }
                    }
                },
            ),
            None => None,
        };
        let flags = ConfigStatus {
            email_configured: services.email,
            turnstile_configured: services.captcha,
            kv_backup_configured: config.stores.backup != StoreBackend::None,
            kv_ratelimit_configured: config.stores.rate_limit != StoreBackend::None,
        };
        (stats, Some(flags))
    } else {
        (None, None)
    };

    let body = HealthResponse {
        status: if ok { "ok" } else { "degraded" },
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        services,
        stats,
        config: config_status,
    };
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// `GET /metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "Handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let mut app = Router::new()
        .route("/api/contact", post(contact))
        .route("/api/contacts", get(contacts))
        .route("/api/health", get(health))
        .fallback(not_found);

    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics));
    }

    let mut app = app.with_state(state.clone());
    if let Some(redirect) = HostRedirect::from_config(&state.config.site) {
        app = app.layer(middleware::from_fn_with_state(
            Arc::new(redirect),
            redirect_apex,
        ));
    }

    app.layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
