// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Contact form validator.
//!
//! Implements structural validation of a submitted form:
//! - Required fields present and non-blank
//! - Basic email syntax
//! - Message length bounds

use thiserror::Error;
use tracing::debug;

/// Minimum message length in characters.
pub const MESSAGE_MIN_CHARS: usize = 10;

/// Maximum message length in characters.
pub const MESSAGE_MAX_CHARS: usize = 5000;

/// A required form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Phone,
    Email,
    Message,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name => write!(f, "Name"),
            Self::Phone => write!(f, "Telefon"),
            Self::Email => write!(f, "E-Mail"),
            Self::Message => write!(f, "Nachricht"),
        }
    }
}

/// Validation error types. Messages are shown to the visitor verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Bitte füllen Sie das Feld \"{0}\" aus")]
    MissingField(Field),

    #[error("Ungültige E-Mail-Adresse")]
    InvalidEmail,

    #[error("Die Nachricht muss mindestens 10 Zeichen lang sein")]
    MessageTooShort,

    #[error("Die Nachricht darf höchstens 5000 Zeichen lang sein")]
    MessageTooLong,
}

/// Raw fields of a contact form, as posted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFields {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    /// Honeypot
    pub website: Option<String>,
    /// `cf-turnstile-response`
    pub captcha_token: Option<String>,
    pub math_answer: Option<String>,
    pub math_expected: Option<String>,
    pub used_fallback: bool,
}

impl ContactFields {
    /// Collect fields from name/value pairs. Unknown names are ignored; for
    /// repeated names the first value wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut fields = Self::default();
        for (name, value) in pairs {
            let slot = match name.as_ref() {
                "name" => &mut fields.name,
                "phone" => &mut fields.phone,
                "email" => &mut fields.email,
                "message" => &mut fields.message,
                "website" => &mut fields.website,
                "cf-turnstile-response" => &mut fields.captcha_token,
                "mathAnswer" => &mut fields.math_answer,
                "mathExpected" => &mut fields.math_expected,
                "usedFallback" => {
                    let value: String = value.into();
                    fields.used_fallback |= matches!(value.trim(), "true" | "1" | "on");
                    continue;
                }
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        fields
    }
}

/// Form fields that passed structural validation, trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidContact {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub message: String,
}

/// Validate the required fields of a contact form.
pub fn validate_contact(fields: &ContactFields) -> Result<ValidContact, ValidationError> {
    let name = required(fields.name.as_deref(), Field::Name)?;
    let phone = required(fields.phone.as_deref(), Field::Phone)?;
    let email = required(fields.email.as_deref(), Field::Email)?;
    let message = required(fields.message.as_deref(), Field::Message)?;

    if !is_valid_email(email) {
        debug!(email = %email, "Invalid email address");
        return Err(ValidationError::InvalidEmail);
    }

    let length = message.chars().count();
    if length < MESSAGE_MIN_CHARS {
        debug!(length, "Message too short");
        return Err(ValidationError::MessageTooShort);
    }
    if length > MESSAGE_MAX_CHARS {
        debug!(length, "Message too long");
        return Err(ValidationError::MessageTooLong);
    }

    Ok(ValidContact {
        name: name.to_string(),
        phone: phone.to_string(),
        email: email.to_string(),
        message: message.to_string(),
    })
}

fn required(value: Option<&str>, field: Field) -> Result<&str, ValidationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => {
            debug!(%field, "Missing required field");
            Err(ValidationError::MissingField(field))
        }
    }
}

/// Accepts `local@domain.tld`: no whitespace, exactly one `@`, and a dot in
/// the domain with text on both sides.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') {
        return false;
    }

    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}
