// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! CAPTCHA verification.
//!
//! A Turnstile token is tried first. Visitors whose browser could not load
//! the widget solve a small arithmetic task instead and flag that with
//! `usedFallback`. With a secret configured, a submission must pass one of
//! the two; without one, CAPTCHA is skipped.

use crate::config::CaptchaConfig;
use crate::models::CaptchaMethod;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a submission failed CAPTCHA verification.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaFailure {
    /// A secret is configured but nothing verifiable was supplied
    #[error("Bitte bestätigen Sie, dass Sie kein Roboter sind")]
    Required,

    /// The challenge API did not accept the token
    #[error("Die Sicherheitsprüfung ist fehlgeschlagen. Bitte laden Sie die Seite neu und versuchen Sie es erneut")]
    TokenRejected,

    /// The fallback answer did not match
    #[error("Die Rechenaufgabe wurde nicht korrekt gelöst")]
    WrongAnswer,
}

/// Result of CAPTCHA verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaOutcome {
    /// No secret configured
    Skipped,
    /// Verified by the given method
    Passed(CaptchaMethod),
    /// Verification failed
    Failed(CaptchaFailure),
}

impl CaptchaOutcome {
    /// The method to record with the submission, if it may proceed.
    pub fn method(&self) -> Option<CaptchaMethod> {
        match self {
            Self::Skipped => Some(CaptchaMethod::None),
            Self::Passed(method) => Some(*method),
            Self::Failed(_) => None,
        }
    }
}

/// CAPTCHA-related input of one submission.
#[derive(Debug, Clone, Default)]
pub struct CaptchaInput<'a> {
    pub token: Option<&'a str>,
    pub used_fallback: bool,
    pub math_answer: Option<&'a str>,
    pub math_expected: Option<&'a str>,
    pub client_ip: &'a str,
}

/// Response of the Turnstile `siteverify` endpoint.
#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Verifies Turnstile tokens and fallback answers.
pub struct CaptchaVerifier {
    client: reqwest::Client,
    secret: Option<String>,
    verify_url: String,
}

impl CaptchaVerifier {
    /// Create a verifier; outbound calls give up after `timeout`.
    pub fn new(config: &CaptchaConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            secret: config.secret_key.clone(),
            verify_url: config.verify_url.clone(),
        })
    }

    /// Whether a secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify one submission.
    pub async fn verify(&self, input: &CaptchaInput<'_>) -> CaptchaOutcome {
        let Some(secret) = self.secret.as_deref() else {
            return CaptchaOutcome::Skipped;
        };

        let token = input.token.map(str::trim).filter(|t| !t.is_empty());
        if let Some(token) = token {
            if self.verify_token(secret, token, input.client_ip).await {
                return CaptchaOutcome::Passed(CaptchaMethod::Turnstile);
            }
        }

        if input.used_fallback {
            return match (input.math_answer, input.math_expected) {
                (Some(answer), Some(expected)) if check_math_answer(answer, expected) => {
                    CaptchaOutcome::Passed(CaptchaMethod::Math)
                }
                (Some(_), Some(_)) => CaptchaOutcome::Failed(CaptchaFailure::WrongAnswer),
                _ => CaptchaOutcome::Failed(CaptchaFailure::Required),
            };
        }

        if token.is_some() {
            CaptchaOutcome::Failed(CaptchaFailure::TokenRejected)
        } else {
            CaptchaOutcome::Failed(CaptchaFailure::Required)
        }
    }

    /// Ask the challenge API about a token. Every failure mode, including
    /// timeouts, counts as "not verified".
    async fn verify_token(&self, secret: &str, token: &str, client_ip: &str) -> bool {
        match self.siteverify(secret, token, client_ip).await {
            Ok(outcome) => {
                if !outcome.success {
                    debug!(error_codes = ?outcome.error_codes, "Turnstile token rejected");
                }
                outcome.success
            }
            Err(err) => {
                warn!(error = %err, timeout = err.is_timeout(), "Turnstile verification failed");
                false
            }
        }
    }

    async fn siteverify(
        &self,
        secret: &str,
        token: &str,
        client_ip: &str,
    ) -> Result<SiteverifyResponse, reqwest::Error> {
        self.client
            .post(&self.verify_url)
            .json(&json!({
                "secret": secret,
                "response": token,
                "remoteip": client_ip,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

/// Compare a fallback answer with the expected value, ignoring surrounding
/// whitespace.
pub fn check_math_answer(answer: &str, expected: &str) -> bool {
    answer.trim() == expected.trim()
}
