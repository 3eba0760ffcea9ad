// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! The submission pipeline.
//!
//! Checks run cheapest first and stop at the first hit:
//!
//! 1. Bot User-Agent (concealed)
//! 2. Submission timing (concealed)
//! 3. Rate limit (429)
//! 4. Required fields, email syntax, message length (400)
//! 5. Honeypot (concealed)
//! 6. Spam keywords and links (400)
//! 7. CAPTCHA (400)
//!
//! An accepted submission is backed up before the notification is sent, so
//! a mail outage never loses it. The request only fails when both the
//! backup and the notification failed.

use crate::backup::BackupStore;
use crate::captcha::{CaptchaInput, CaptchaOutcome, CaptchaVerifier};
use crate::config::{Config, ConfigError, EmailConfig};
use crate::error::Rejection;
use crate::heuristics::{
    contains_spam_keywords, contains_urls, is_bot_user_agent, is_honeypot_filled,
};
use crate::limiter::{RateLimitResult, RateLimiter, TimingGuard};
use crate::models::{CaptchaMethod, Submission, SUBMISSION_SOURCE};
use crate::notify::{EmailMessage, Notifier};
use crate::store::{KvStore, Stores};
use crate::validator::{validate_contact, ContactFields};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Who sent a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

/// Final decision about a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Accepted; at least one of backup and notification succeeded
    Accepted {
        backup_id: Option<String>,
        notified: bool,
    },
    /// Turned away; see [`Rejection::disclosure`] for how to answer
    Rejected(Rejection),
    /// Accepted, but neither backup nor notification succeeded
    CriticalFailure,
}

impl GateOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected(rejection) => rejection.label(),
            Self::CriticalFailure => "critical",
        }
    }
}

/// Runs the submission pipeline.
pub struct SubmissionGatekeeper {
    limiter: RateLimiter,
    timing: TimingGuard,
    captcha: CaptchaVerifier,
    backups: Option<BackupStore>,
    notifier: Option<Arc<dyn Notifier>>,
    email: EmailConfig,
}

impl SubmissionGatekeeper {
    /// Wire the pipeline from configuration and store bindings.
    pub fn new(
        config: &Config,
        stores: &Stores,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self, ConfigError> {
        let limiter = RateLimiter::new(config.rate_limit.clone(), stores.rate_limit.clone());
        let timing_store: Arc<dyn KvStore> = match &stores.rate_limit {
            Some(store) => store.clone(),
            None => limiter.fallback().clone() as Arc<dyn KvStore>,
        };
        let timing = TimingGuard::new(&config.rate_limit, timing_store);
        let captcha = CaptchaVerifier::new(&config.captcha, config.outbound_timeout())?;
        let backups = stores
            .backup
            .clone()
            .map(|store| BackupStore::new(store, config.backup.retention()));

        Ok(Self {
            limiter,
            timing,
            captcha,
            backups,
            notifier,
            email: config.email.clone(),
        })
    }

    /// The rate limiter, for maintenance tasks.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run the whole pipeline.
    pub async fn process(&self, client: &ClientInfo, fields: &ContactFields) -> GateOutcome {
        if let Err(rejection) = self.screen(client).await {
            return GateOutcome::Rejected(rejection);
        }
        self.submit(client, fields).await
    }

    /// Checks that only need the request metadata (steps 1-3). Runs before
    /// the body is read.
    pub async fn screen(&self, client: &ClientInfo) -> Result<(), Rejection> {
        if is_bot_user_agent(&client.user_agent) {
            info!(ip = %client.ip, user_agent = %client.user_agent, "Bot user agent, discarding");
            return Err(Rejection::BotUserAgent);
        }

        if self.timing.check_and_mark(&client.ip).await {
            info!(ip = %client.ip, "Submission too fast, discarding");
            return Err(Rejection::TooFast);
        }

        let rate = self.limiter.check(&client.ip).await;
        if let RateLimitResult::Limited { .. } = rate {
            let wait_minutes = rate.wait_minutes().unwrap_or(1);
            info!(ip = %client.ip, wait_minutes, "Submission rate limited");
            return Err(Rejection::RateLimited { wait_minutes });
        }

        Ok(())
    }

    /// Checks on the form content, then persistence and notification
    /// (steps 4-10).
    pub async fn submit(&self, client: &ClientInfo, fields: &ContactFields) -> GateOutcome {
        let contact = match validate_contact(fields) {
            Ok(contact) => contact,
            Err(err) => {
                info!(ip = %client.ip, error = %err, "Submission failed validation");
                return GateOutcome::Rejected(err.into());
            }
        };

        if is_honeypot_filled(fields.website.as_deref()) {
            info!(ip = %client.ip, "Honeypot filled, discarding");
            return GateOutcome::Rejected(Rejection::Honeypot);
        }

        if contains_spam_keywords(&contact.message) || contains_spam_keywords(&contact.name) {
            info!(ip = %client.ip, "Spam keywords in submission");
            return GateOutcome::Rejected(Rejection::SpamContent);
        }

        if contains_urls(&contact.message) {
            info!(ip = %client.ip, "Links in submission");
            return GateOutcome::Rejected(Rejection::LinksNotAllowed);
        }

        let captcha = self
            .captcha
            .verify(&CaptchaInput {
                token: fields.captcha_token.as_deref(),
                used_fallback: fields.used_fallback,
                math_answer: fields.math_answer.as_deref(),
                math_expected: fields.math_expected.as_deref(),
                client_ip: &client.ip,
            })
            .await;
        let captcha_method = match captcha {
            CaptchaOutcome::Failed(failure) => {
                info!(ip = %client.ip, reason = ?failure, "CAPTCHA verification failed");
                return GateOutcome::Rejected(failure.into());
            }
            outcome => outcome.method().unwrap_or(CaptchaMethod::None),
        };

        let submission = Submission {
            name: contact.name,
            phone: contact.phone,
            email: contact.email,
            message: contact.message,
            client_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            captcha_method,
            source: SUBMISSION_SOURCE.to_string(),
        };

        self.deliver(submission).await
    }

    /// Back up, then notify.
    async fn deliver(&self, submission: Submission) -> GateOutcome {
        let backup_id = match &self.backups {
            Some(backups) => match backups.save(submission.clone(), Utc::now()).await {
                Ok(record) => Some(record.id),
                Err(err) => {
                    error!(error = %err, "Failed to back up submission");
                    None
                }
            },
            None => {
                warn!("No backup store configured, submission not backed up");
                None
            }
        };

        let notified = match &self.notifier {
            Some(notifier) => {
                let message =
                    EmailMessage::for_submission(&self.email, &submission, backup_id.as_deref());
                match notifier.send(&message).await {
                    Ok(_) => true,
                    Err(err) => {
                        error!(error = %err, backup_id = ?backup_id, "Failed to send notification");
                        false
                    }
                }
            }
            None => {
                warn!("No mail API configured, notification skipped");
                false
            }
        };

        if backup_id.is_none() && !notified {
            error!(
                critical = true,
                name = %submission.name,
                email = %submission.email,
                phone = %submission.phone,
                "Submission lost: backup and notification both failed"
            );
            return GateOutcome::CriticalFailure;
        }

        info!(
            backup_id = ?backup_id,
            notified,
            captcha = %submission.captcha_method,
            "Submission accepted"
        );
        GateOutcome::Accepted {
            backup_id,
            notified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::CaptchaFailure;
    use crate::config::StoreBackend;
    use crate::notify::NotifyError;
    use crate::validator::ValidationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, _message: &EmailMessage) -> Result<String, NotifyError> {
            if self.fail {
                return Err(NotifyError::Api {
                    status: 500,
                    message: "down".to_string(),
                });
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok("msg_1".to_string())
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.rate_limit.min_interval_ms = 0;
        config.stores.rate_limit = StoreBackend::Memory;
        config
    }

    fn gatekeeper(config: &Config, notifier: Option<Arc<dyn Notifier>>) -> SubmissionGatekeeper {
        let stores = Stores::from_config(&config.stores, config.outbound_timeout()).unwrap();
        SubmissionGatekeeper::new(config, &stores, notifier).unwrap()
    }

    fn client(ip: &str) -> ClientInfo {
        ClientInfo {
            ip: ip.to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0".to_string(),
        }
    }

    fn fields() -> ContactFields {
        ContactFields {
            name: Some("Max Mustermann".to_string()),
            phone: Some("0123456789".to_string()),
            email: Some("max@example.com".to_string()),
            message: Some("Bitte um Rückruf wegen einer Alarmanlage.".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_accepts_and_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = gatekeeper(&config(), Some(notifier.clone()));

        let outcome = gate.process(&client("10.0.0.1"), &fields()).await;
        match outcome {
            GateOutcome::Accepted {
                backup_id: Some(id),
                notified: true,
            } => assert!(id.starts_with("contact_")),
            other => panic!("Unexpected outcome: {other:?}"),
        }
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bot_user_agent_is_concealed_rejection() {
        let gate = gatekeeper(&config(), Some(Arc::new(RecordingNotifier::default())));
        let bot = ClientInfo {
            ip: "10.0.0.1".to_string(),
            user_agent: "python-requests/2.31".to_string(),
        };

        assert_eq!(
            gate.process(&bot, &fields()).await,
            GateOutcome::Rejected(Rejection::BotUserAgent)
        );
    }

    #[tokio::test]
    async fn test_validation_precedes_honeypot() {
        let gate = gatekeeper(&config(), None);
        let mut form = fields();
        form.email = Some("not-an-email".to_string());
        form.website = Some("http://spam.example".to_string());

        assert_eq!(
            gate.submit(&client("10.0.0.1"), &form).await,
            GateOutcome::Rejected(Rejection::Invalid(ValidationError::InvalidEmail))
        );

        form.email = Some("max@example.com".to_string());
        assert_eq!(
            gate.submit(&client("10.0.0.1"), &form).await,
            GateOutcome::Rejected(Rejection::Honeypot)
        );
    }

    #[tokio::test]
    async fn test_spam_and_links() {
        let gate = gatekeeper(&config(), None);

        let mut form = fields();
        form.message = Some("Buy viagra online today, best prices".to_string());
        assert_eq!(
            gate.submit(&client("10.0.0.1"), &form).await,
            GateOutcome::Rejected(Rejection::SpamContent)
        );

        form.message = Some("Schauen Sie auf www.example.com vorbei".to_string());
        assert_eq!(
            gate.submit(&client("10.0.0.1"), &form).await,
            GateOutcome::Rejected(Rejection::LinksNotAllowed)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_after_max_submissions() {
        let mut config = config();
        config.rate_limit.max_submissions = 2;
        let gate = gatekeeper(&config, Some(Arc::new(RecordingNotifier::default())));
        let ip = client("10.0.0.9");

        assert!(gate.screen(&ip).await.is_ok());
        assert!(gate.screen(&ip).await.is_ok());
        assert_eq!(
            gate.screen(&ip).await,
            Err(Rejection::RateLimited { wait_minutes: 15 })
        );
    }

    #[tokio::test]
    async fn test_second_submission_too_fast() {
        let mut config = config();
        config.rate_limit.min_interval_ms = 3000;
        let gate = gatekeeper(&config, None);
        let ip = client("10.0.0.3");

        assert!(gate.screen(&ip).await.is_ok());
        assert_eq!(gate.screen(&ip).await, Err(Rejection::TooFast));
    }

    #[tokio::test]
    async fn test_captcha_required_when_secret_configured() {
        let mut config = config();
        config.captcha.secret_key = Some("secret".to_string());
        let gate = gatekeeper(&config, None);

        assert_eq!(
            gate.submit(&client("10.0.0.1"), &fields()).await,
            GateOutcome::Rejected(Rejection::Captcha(CaptchaFailure::Required))
        );

        let mut form = fields();
        form.used_fallback = true;
        form.math_answer = Some("9".to_string());
        form.math_expected = Some("9".to_string());
        assert!(matches!(
            gate.submit(&client("10.0.0.1"), &form).await,
            GateOutcome::Accepted { .. }
        ));
    }

    #[tokio::test]
    async fn test_backup_survives_notification_failure() {
        let gate = gatekeeper(
            &config(),
            Some(Arc::new(RecordingNotifier {
                fail: true,
                ..Default::default()
            })),
        );

        let outcome = gate.submit(&client("10.0.0.1"), &fields()).await;
        assert!(matches!(
            outcome,
            GateOutcome::Accepted {
                backup_id: Some(_),
                notified: false
            }
        ));
    }

    #[tokio::test]
    async fn test_critical_when_nothing_delivered() {
        let mut config = config();
        config.stores.rate_limit = StoreBackend::None;
        let gate = gatekeeper(&config, None);

        let outcome = gate.submit(&client("10.0.0.1"), &fields()).await;
        assert_eq!(outcome, GateOutcome::CriticalFailure);
        assert_eq!(outcome.label(), "critical");
    }
}
