// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Builders for contact form requests.

use axum::{body::Body, extract::ConnectInfo, http::Request};
use std::net::SocketAddr;

pub const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Socket address of the reverse proxy the test configuration trusts.
pub const PROXY_PEER: &str = "127.0.0.1:41000";

const BOUNDARY: &str = "----gatekeeper-test-boundary";

/// A contact form submission, prefilled with valid fields.
#[derive(Debug, Clone)]
pub struct ContactRequest {
    ip: String,
    peer: SocketAddr,
    headers: Vec<(String, String)>,
    user_agent: Option<String>,
    fields: Vec<(String, String)>,
    multipart: bool,
}

impl ContactRequest {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            peer: PROXY_PEER.parse().unwrap(),
            headers: Vec::new(),
            user_agent: Some(BROWSER_UA.to_string()),
            fields: vec![
                ("name".to_string(), "Max Mustermann".to_string()),
                ("phone".to_string(), "0123456789".to_string()),
                ("email".to_string(), "max@example.com".to_string()),
                (
                    "message".to_string(),
                    "Ich interessiere mich für eine Alarmanlage für mein Haus.".to_string(),
                ),
                ("website".to_string(), String::new()),
            ],
            multipart: false,
        }
    }

    /// Set or replace a field.
    pub fn field(mut self, name: &str, value: &str) -> Self {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
        self
    }

    /// Drop a field.
    pub fn without(mut self, name: &str) -> Self {
        self.fields.retain(|(n, _)| n != name);
        self
    }

    /// Connect from `peer` instead of the trusted proxy.
    pub fn peer(mut self, peer: &str) -> Self {
        self.peer = peer.parse().unwrap();
        self
    }

    /// Add an extra request header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn without_user_agent(mut self) -> Self {
        self.user_agent = None;
        self
    }

    /// Encode as `multipart/form-data` instead of url-encoded.
    pub fn multipart(mut self) -> Self {
        self.multipart = true;
        self
    }

    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/contact")
            .header("cf-connecting-ip", &self.ip)
            .extension(ConnectInfo(self.peer));
        if let Some(ua) = &self.user_agent {
            builder = builder.header("user-agent", ua);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if self.multipart {
            let mut body = String::new();
            for (name, value) in &self.fields {
                body.push_str(&format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                ));
            }
            body.push_str(&format!("--{BOUNDARY}--\r\n"));
            builder
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap()
        } else {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.fields)
                .finish();
            builder
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap()
        }
    }
}
