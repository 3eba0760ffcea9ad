// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Data models for submissions and the records kept about them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Origin tag stored with every submission.
pub const SUBMISSION_SOURCE: &str = "website";

/// How a submission passed CAPTCHA verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaMethod {
    /// No CAPTCHA was configured
    None,
    /// Turnstile token verified by the challenge API
    Turnstile,
    /// Computed-answer fallback
    Math,
}

impl std::fmt::Display for CaptchaMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Turnstile => write!(f, "turnstile"),
            Self::Math => write!(f, "math"),
        }
    }
}

/// A validated contact form submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub message: String,
    pub client_ip: String,
    pub user_agent: String,
    pub captcha_method: CaptchaMethod,
    pub source: String,
}

/// Processing state of a backup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    /// Stored, not yet handled by the back office
    Pending,
    /// Handled by the back office
    Processed,
}

/// A submission as persisted in the backup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Unique, time-ordered record id
    pub id: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,
    #[serde(flatten)]
    pub submission: Submission,
}

impl BackupRecord {
    /// Wrap a submission in a new pending record created at `now`.
    pub fn new(submission: Submission, now: DateTime<Utc>) -> Self {
        Self {
            id: record_id(now),
            timestamp: now,
            status: BackupStatus::Pending,
            submission,
        }
    }

    /// The calendar day (UTC) whose index lists this record.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Fixed-window counter for one client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    pub count: u32,
    /// Window start, seconds since the Unix epoch
    pub window_start: i64,
}

/// Time of the last submission seen from one client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingMarker {
    /// Milliseconds since the Unix epoch
    pub last_submission: i64,
}

/// Generate `contact_<millis>_<9 hex chars>`.
///
/// The zero-padded millisecond prefix makes ids sort by creation time.
pub fn record_id(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("contact_{:013}_{}", now.timestamp_millis(), &random[..9])
}

/// Key of the record id list for one day.
pub fn index_key(date: NaiveDate) -> String {
    format!("index_{}", date.format("%Y-%m-%d"))
}

/// Key of the rate-limit counter for one IP.
pub fn rate_limit_key(ip: &str) -> String {
    format!("ratelimit_{ip}")
}

/// Key of the timing marker for one IP.
pub fn timing_key(ip: &str) -> String {
    format!("timing_{ip}")
}
