use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A signed-in browser. Existence of the record is what makes its id a valid
/// bearer credential; deleting it revokes the session everywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub ip: String,
    pub user_agent: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub mfa_expires_at: DateTime<Utc>,
    /// One-shot notice shown on the next page for this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
}

impl Session {
    pub fn has_mfa_expired(&self) -> bool {
        self.has_mfa_expired_at(Utc::now())
    }

    pub fn has_mfa_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.mfa_expires_at <= now
    }

}

/// Short, log-safe prefix of a session id.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Session fields supplied by the caller; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub mfa_expires_at: DateTime<Utc>,
}

impl NewSession {
    pub fn into_session(self, id: String) -> Session {
        Session {
            id,
            user_id: self.user_id,
            ip: self.ip,
            user_agent: self.user_agent,
            created_at: self.created_at,
            mfa_expires_at: self.mfa_expires_at,
            flash: None,
        }
    }
}

/// 32 bytes from the OS RNG, base64url without padding.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
