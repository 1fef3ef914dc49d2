use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime of a reset token from issuance.
pub const RESET_TOKEN_TTL_SECONDS: i64 = 3600;

/// Outstanding password reset. The id doubles as the emailed token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordReset {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub browser: String,
    pub os: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl PasswordReset {
    pub fn new(id: String, user_id: String, browser: String, os: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            browser,
            os,
            created_at: now,
            expires_at: now + Duration::seconds(RESET_TOKEN_TTL_SECONDS),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_after_one_hour() {
        let now = Utc::now();
        let reset = PasswordReset::new("t".into(), "u".into(), "Firefox".into(), "Linux".into(), now);

        assert!(!reset.is_expired_at(now));
        assert!(!reset.is_expired_at(now + Duration::seconds(3599)));
        assert!(reset.is_expired_at(now + Duration::seconds(3600)));
    }
}
