// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Contact Gatekeeper
//!
//! Backend for a website contact form. Every submission passes a chain of
//! checks before it is kept:
//!
//! - Bot User-Agent and submission timing heuristics
//! - Fixed-window rate limiting per IP (5 per 15 minutes default)
//! - Field validation, honeypot, spam keywords and link detection
//! - Turnstile CAPTCHA with an arithmetic fallback
//!
//! Accepted submissions are backed up to a key-value store before the
//! notification mail is sent. Automated senders receive the same success
//! response as people, so they cannot tell they were filtered.

pub mod backup;
pub mod captcha;
pub mod config;
pub mod error;
pub mod gatekeeper;
pub mod handlers;
pub mod heuristics;
pub mod limiter;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod redirect;
pub mod store;
pub mod validator;

pub use config::Config;
pub use error::{Disclosure, Rejection};
pub use gatekeeper::{ClientInfo, GateOutcome, SubmissionGatekeeper};
pub use handlers::{router, AppState};
pub use limiter::{RateLimitResult, RateLimiter};
pub use store::{KvStore, MemoryStore, Stores};
