// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Notification mail for accepted submissions.

use crate::config::EmailConfig;
use crate::models::Submission;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Notification error types.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Mail API request timed out")]
    Timeout,

    #[error("Mail API transport error: {0}")]
    Transport(String),

    #[error("Mail API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A rendered notification message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub reply_to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl EmailMessage {
    /// Render the notification for a submission.
    pub fn for_submission(
        config: &EmailConfig,
        submission: &Submission,
        backup_id: Option<&str>,
    ) -> Self {
        let reference = backup_id.unwrap_or("-");

        let html = format!(
            r#"<!DOCTYPE html>
<html>
  <head><meta charset="UTF-8"></head>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
      <h1 style="background: #FA0016; color: white; padding: 20px; text-align: center;">Neue Anfrage über Website</h1>
      <p><strong>Name:</strong><br>{name}</p>
      <p><strong>Telefon:</strong><br>{phone}</p>
      <p><strong>E-Mail:</strong><br>{email}</p>
      <p><strong>Nachricht:</strong></p>
      <div style="background: white; padding: 15px; border-left: 4px solid #FA0016;">{message}</div>
      <p style="color: #6e6e73; font-size: 12px;">Referenz: {reference} · Prüfung: {captcha}</p>
    </div>
  </body>
</html>"#,
            name = escape_html(&submission.name),
            phone = escape_html(&submission.phone),
            email = escape_html(&submission.email),
            message = escape_html(&submission.message).replace('\n', "<br>"),
            reference = escape_html(reference),
            captcha = submission.captcha_method,
        );

        let text = format!(
            "Neue Anfrage über Website\n\n\
             Name: {}\nTelefon: {}\nE-Mail: {}\n\n\
             Nachricht:\n{}\n\n---\nReferenz: {}\n",
            submission.name, submission.phone, submission.email, submission.message, reference,
        );

        Self {
            from: config.from.clone(),
            to: config.to.clone(),
            reply_to: submission.email.clone(),
            subject: format!("Neue Anfrage von {}", single_line(&submission.name)),
            html,
            text,
        }
    }
}

/// Delivers notification messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message, returning the provider's message id.
    async fn send(&self, message: &EmailMessage) -> Result<String, NotifyError>;
}

/// Response body of a successful Resend call.
#[derive(Debug, Deserialize)]
struct ResendResponse {
    #[serde(default)]
    id: String,
}

/// Error body returned by Resend.
#[derive(Debug, Deserialize)]
struct ResendErrorBody {
    message: Option<String>,
}

/// Sends mail through the Resend HTTP API.
pub struct ResendNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ResendNotifier {
    /// Create a notifier; `None` if no API key is configured.
    pub fn from_config(
        config: &EmailConfig,
        timeout: Duration,
    ) -> Result<Option<Self>, reqwest::Error> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };

        Ok(Some(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_url: config.api_url.clone(),
            api_key,
        }))
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<String, NotifyError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ResendErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(body);
            return Err(NotifyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let sent: ResendResponse = response.json().await?;
        debug!(message_id = %sent.id, "Notification sent");
        Ok(sent.id)
    }
}

/// Collapse control characters (CR, LF, tabs) so the text fits a header.
fn single_line(text: &str) -> String {
    text.split(char::is_control)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape text for inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
