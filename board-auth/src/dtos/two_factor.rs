use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollmentResponse {
    pub secret: String,
    pub qr_code: String,
    pub otpauth_url: String,
    pub duration_options: Vec<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmTwoFactorRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,

    /// Must be one of the configured options when present.
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoveryCodesResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnterCodeRequest {
    #[validate(length(min = 1, max = 32, message = "Code is required"))]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnterCodeResponse {
    pub used_recovery_code: bool,
    pub remaining_recovery_codes: usize,
}
