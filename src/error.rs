// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Reasons a submission is turned away, and how each is reported.

use crate::captcha::CaptchaFailure;
use crate::validator::ValidationError;
use axum::http::StatusCode;
use thiserror::Error;

/// Whether the sender learns about a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disclosure {
    /// Answer with the same success response a genuine submission gets
    Conceal,
    /// Answer with a specific error
    Disclose,
}

/// Reason a submission was not accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Automated user agent")]
    BotUserAgent,

    #[error("Submitted too quickly after the previous submission")]
    TooFast,

    #[error("Honeypot field filled")]
    Honeypot,

    #[error("Zu viele Anfragen. Bitte warten Sie {wait_minutes} Minuten und versuchen Sie es erneut")]
    RateLimited { wait_minutes: u64 },

    #[error("{0}")]
    Invalid(#[from] ValidationError),

    #[error("Ihre Nachricht wurde als Spam erkannt. Bitte formulieren Sie sie um oder rufen Sie uns an")]
    SpamContent,

    #[error("Links sind in Nachrichten nicht erlaubt. Bitte entfernen Sie alle URLs")]
    LinksNotAllowed,

    #[error("{0}")]
    Captcha(#[from] CaptchaFailure),
}

impl Rejection {
    /// Automation signals are concealed so senders cannot tell they were
    /// caught; everything a person could run into is disclosed. A concealed
    /// rejection answers like a stored submission, with a decoy backup id.
    pub fn disclosure(&self) -> Disclosure {
        match self {
            Self::BotUserAgent | Self::TooFast | Self::Honeypot => Disclosure::Conceal,
            Self::RateLimited { .. }
            | Self::Invalid(_)
            | Self::SpamContent
            | Self::LinksNotAllowed
            | Self::Captcha(_) => Disclosure::Disclose,
        }
    }

    /// HTTP status of a disclosed rejection.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BotUserAgent => "bot_user_agent",
            Self::TooFast => "too_fast",
            Self::Honeypot => "honeypot",
            Self::RateLimited { .. } => "rate_limited",
            Self::Invalid(_) => "invalid",
            Self::SpamContent => "spam_content",
            Self::LinksNotAllowed => "links",
            Self::Captcha(_) => "captcha",
        }
    }
}
