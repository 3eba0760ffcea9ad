// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Contact Gatekeeper Service
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (and `.env`):
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `RESEND_API_KEY`: Mail API key; unset disables notification
//! - `TURNSTILE_SECRET_KEY`: CAPTCHA secret; unset skips CAPTCHA
//! - `CONTACTS_API_KEY`: Admin key for `/api/contacts`
//! - `RATE_LIMIT_KV`, `CONTACT_BACKUP_KV`: `memory` or `cloudflare:<namespace-id>`
//! - `RATE_LIMIT_MAX`: Submissions per window and IP (default: 5)
//! - `RATE_LIMIT_WINDOW_SECS`: Window length (default: 900)
//! - `APEX_HOST`, `WWW_HOST`: Enable the apex-to-www redirect

use contact_gatekeeper::{
    config::Config,
    handlers::{router, AppState},
    notify::{Notifier, ResendNotifier},
    store::Stores,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        max_submissions = config.rate_limit.max_submissions,
        window_secs = config.rate_limit.window_secs,
        captcha = config.captcha.secret_key.is_some(),
        email = config.email.api_key.is_some(),
        backup = config.backup_configured(),
        trusted_proxies = ?config.trusted_proxies,
        "Starting contact gatekeeper"
    );

    // Wire collaborators
    let stores = Stores::from_config(&config.stores, config.outbound_timeout())?;
    let notifier = ResendNotifier::from_config(&config.email, config.outbound_timeout())?
        .map(|notifier| Arc::new(notifier) as Arc<dyn Notifier>);
    if notifier.is_none() {
        warn!("RESEND_API_KEY not set, notifications disabled");
    }
    if stores.backup.is_none() {
        warn!("No backup store bound, submissions are not backed up");
    }

    let addr: SocketAddr = config.bind_addr.parse()?;
    let state = Arc::new(AppState::new(config, stores, notifier)?);

    // Spawn cleanup task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = cleanup_state.purge_expired().await;
            if purged > 0 {
                debug!(purged, "Purged expired store entries");
            }
        }
    });

    // Start server
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
