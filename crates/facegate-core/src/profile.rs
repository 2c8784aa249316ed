//! Profile fields attached to an enrolled identity, validated at construction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of digits in a phone number.
pub const MIN_PHONE_DIGITS: usize = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("identity key must not be empty")]
    EmptyKey,
    #[error("name must not be empty")]
    EmptyName,
    #[error("malformed contact address: {0}")]
    MalformedEmail(String),
    #[error("phone number must contain at least {MIN_PHONE_DIGITS} digits, got {0}")]
    PhoneTooShort(usize),
    #[error("phone number contains invalid character '{0}'")]
    PhoneInvalidChar(char),
}

/// Contact details of an enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProfile")]
pub struct Profile {
    name: String,
    surname: String,
    phone: String,
    email: String,
}

#[derive(Deserialize)]
struct RawProfile {
    name: String,
    #[serde(default)]
    surname: String,
    phone: String,
    email: String,
}

impl TryFrom<RawProfile> for Profile {
    type Error = ValidationError;

    fn try_from(raw: RawProfile) -> Result<Self, Self::Error> {
        Profile::new(raw.name, raw.surname, raw.phone, raw.email)
    }
}

impl Profile {
    /// Build a profile. Name, phone and email are trimmed and validated;
    /// the surname is free-form.
    pub fn new(
        name: impl Into<String>,
        surname: impl Into<String>,
        phone: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let phone = phone.into().trim().to_string();
        validate_phone(&phone)?;

        let email = email.into().trim().to_string();
        validate_email(&email)?;

        Ok(Self {
            name,
            surname: surname.into().trim().to_string(),
            phone,
            email,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surname(&self) -> &str {
        &self.surname
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// "Name Surname", or just the name when no surname was given.
    pub fn display_name(&self) -> String {
        if self.surname.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.surname)
        }
    }
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let mut digits = 0usize;
    for c in phone.chars() {
        match c {
            '0'..='9' => digits += 1,
            ' ' | '+' | '-' | '(' | ')' => {}
            other => return Err(ValidationError::PhoneInvalidChar(other)),
        }
    }
    if digits < MIN_PHONE_DIGITS {
        return Err(ValidationError::PhoneTooShort(digits));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let malformed = || ValidationError::MalformedEmail(email.to_string());

    if email.chars().any(char::is_whitespace) {
        return Err(malformed());
    }
    let (local, domain) = email.split_once('@').ok_or_else(malformed)?;
    if local.is_empty() || domain.contains('@') {
        return Err(malformed());
    }
    // Domain needs at least one dot with non-empty labels on both sides.
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() && !domain.starts_with('.') => Ok(()),
        _ => Err(malformed()),
    }
}
