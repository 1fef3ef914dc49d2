//! User model. The full account record is owned by user management; this
//! service reads it and updates the credential and two-factor fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grace period applied to new accounts before an MFA re-challenge (three days).
pub const DEFAULT_AUTH_DURATION_SECONDS: i64 = 259_200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    #[serde(default)]
    pub has_2fa_enabled: bool,
    /// Base32 TOTP secret, present once enrollment has begun.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
    #[serde(default)]
    pub auth_duration_seconds: i64,
    #[serde(default)]
    pub recovery_codes: Vec<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, name: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            name,
            password_hash,
            has_2fa_enabled: false,
            totp_secret: None,
            auth_duration_seconds: DEFAULT_AUTH_DURATION_SECONDS,
            recovery_codes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Configured MFA grace period, or `fallback` when unset.
    pub fn auth_duration_or(&self, fallback: i64) -> i64 {
        if self.auth_duration_seconds > 0 {
            self.auth_duration_seconds
        } else {
            fallback
        }
    }

    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser::from(self)
    }
}

/// User view without credential material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub has_2fa_enabled: bool,
    pub auth_duration_seconds: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for SanitizedUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            email: u.email.clone(),
            name: u.name.clone(),
            has_2fa_enabled: u.has_2fa_enabled,
            auth_duration_seconds: u.auth_duration_seconds,
            created_at: u.created_at,
        }
    }
}
