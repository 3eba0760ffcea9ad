// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics.
//!
//! ```text
//! contact_submissions_total{outcome}   accepted | critical | <rejection label>
//! ```

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Metrics error types.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("Failed to encode metrics: {0}")]
    Encoding(String),
}

/// Registry holding the service metrics.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    submissions_total: IntCounterVec,
}

impl Metrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let submissions_total = IntCounterVec::new(
            Opts::new(
                "contact_submissions_total",
                "Contact form submissions by pipeline outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(submissions_total.clone()))?;

        Ok(Self {
            registry,
            submissions_total,
        })
    }

    /// Count one submission with the given outcome label.
    pub fn record_submission(&self, outcome: &str) {
        self.submissions_total.with_label_values(&[outcome]).inc();
    }

    /// Submissions counted so far with the given outcome label.
    pub fn submissions(&self, outcome: &str) -> u64 {
        self.submissions_total.with_label_values(&[outcome]).get()
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}
