// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Apex-to-www redirect middleware.

use crate::config::SiteConfig;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Redirects the bare hostname to the canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRedirect {
    apex: String,
    canonical: String,
}

impl HostRedirect {
    /// `None` when no apex host is configured.
    pub fn from_config(site: &SiteConfig) -> Option<Self> {
        let apex = site.apex_host.as_deref()?.trim().to_ascii_lowercase();
        let canonical = site.canonical_host()?.trim().to_ascii_lowercase();
        if apex.is_empty() || apex == canonical {
            return None;
        }
        Some(Self { apex, canonical })
    }

    /// Where a request for `host` should go instead, if anywhere. The port,
    /// path and query are kept.
    pub fn location(&self, scheme: &str, host: &str, path_and_query: &str) -> Option<String> {
        let hostname = host.split(':').next().unwrap_or(host);
        if !hostname.eq_ignore_ascii_case(&self.apex) {
            return None;
        }

        let mut url = Url::parse(&format!("{scheme}://{host}{path_and_query}")).ok()?;
        url.set_host(Some(&self.canonical)).ok()?;
        Some(url.into())
    }
}

/// Middleware answering apex-host requests with `301 Moved Permanently`.
pub async fn redirect_apex(
    State(redirect): State<Arc<HostRedirect>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request_host(&request);
    let scheme = forwarded_scheme(request.headers());
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let target = host.and_then(|host| redirect.location(scheme, &host, path_and_query));
    match target {
        Some(location) => {
            debug!(%location, "Redirecting to canonical host");
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        None => next.run(request).await,
    }
}

fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

fn forwarded_scheme(headers: &HeaderMap) -> &'static str {
    match headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        Some(proto) if proto.eq_ignore_ascii_case("http") => "http",
        _ => "https",
    }
}
