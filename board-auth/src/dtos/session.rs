use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SanitizedUser;

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: SanitizedUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
}

/// One row of the active-sessions listing. `index` is what the revoke
/// endpoint takes.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub index: usize,
    pub ip: String,
    pub browser: String,
    pub os: String,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub account: String,
    pub sessions: Vec<SessionView>,
}
