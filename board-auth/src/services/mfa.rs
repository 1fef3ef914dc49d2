//! TOTP two-factor authentication: enrollment, challenge and recovery codes.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

use super::session::SessionService;
use super::store::UserStore;
use super::ServiceError;
use crate::models::{Session, User};

pub const RECOVERY_CODE_COUNT: usize = 10;
pub const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Window applied when neither the request nor configuration supplies one.
const FALLBACK_DURATION_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct MfaSettings {
    pub issuer: String,
    pub default_duration_seconds: i64,
    pub duration_options: Vec<i64>,
}

/// What a user needs to add the account to an authenticator app.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub secret: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
    pub otpauth_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOutcome {
    pub used_recovery_code: bool,
    pub remaining_recovery_codes: usize,
}

#[derive(Clone)]
pub struct MfaService {
    users: Arc<dyn UserStore>,
    sessions: SessionService,
    settings: MfaSettings,
}

impl MfaService {
    pub fn new(users: Arc<dyn UserStore>, sessions: SessionService, settings: MfaSettings) -> Self {
        Self {
            users,
            sessions,
            settings,
        }
    }

    pub fn duration_options(&self) -> &[i64] {
        &self.settings.duration_options
    }

    fn totp(&self, secret_b32: &str, account: &str) -> Result<TOTP, ServiceError> {
        let bytes = Secret::Encoded(secret_b32.to_string())
            .to_bytes()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Invalid TOTP secret: {:?}", e)))?;

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            bytes,
            Some(self.settings.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("TOTP init error: {}", e)))
    }

    /// Provisions a fresh secret and stores it on the user without enabling
    /// two-factor yet.
    pub async fn begin_enrollment(&self, user: &User) -> Result<Enrollment, ServiceError> {
        if user.has_2fa_enabled {
            return Err(ServiceError::MfaAlreadyEnabled);
        }

        let secret = Secret::generate_secret().to_encoded().to_string();
        let totp = self.totp(&secret, &user.email)?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("QR gen error: {}", e)))?;

        self.users.set_totp_secret(&user.id, &secret).await?;

        tracing::info!(user_id = %user.id, "Two-factor enrollment started");

        Ok(Enrollment {
            secret,
            qr_code: format!("data:image/png;base64,{}", qr),
            otpauth_url: totp.get_url(),
        })
    }

    /// Checks `code` against the pending secret, enables two-factor and
    /// returns a fresh set of recovery codes. The confirming session keeps
    /// its access; every other session must pass the challenge again.
    pub async fn confirm_enrollment(
        &self,
        user: &User,
        session: &Session,
        code: &str,
        duration_seconds: Option<i64>,
    ) -> Result<Vec<String>, ServiceError> {
        self.confirm_enrollment_at(user, session, code, duration_seconds, Utc::now())
            .await
    }

    pub async fn confirm_enrollment_at(
        &self,
        user: &User,
        session: &Session,
        code: &str,
        duration_seconds: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ServiceError> {
        if user.has_2fa_enabled {
            return Err(ServiceError::MfaAlreadyEnabled);
        }
        let secret = user
            .totp_secret
            .as_deref()
            .ok_or(ServiceError::MfaNotProvisioned)?;

        if !self.check_code_at(secret, &user.email, code, now)? {
            tracing::warn!(user_id = %user.id, "Incorrect TOTP code submitted during enrollment");
            return Err(ServiceError::InvalidMfaCode);
        }

        let duration = match duration_seconds {
            Some(d) if self.settings.duration_options.contains(&d) => d,
            Some(d) => {
                return Err(ServiceError::ValidationError(format!(
                    "Unsupported two-factor duration: {}",
                    d
                )))
            }
            None if self.settings.default_duration_seconds > 0 => {
                self.settings.default_duration_seconds
            }
            None => FALLBACK_DURATION_SECONDS,
        };

        let codes = generate_recovery_codes();

        // The code was checked against `secret`; a concurrent confirm or a
        // restarted enrollment means this request lost.
        if !self
            .users
            .enable_mfa(&user.id, secret, duration, &codes)
            .await?
        {
            tracing::warn!(user_id = %user.id, "Two-factor state changed during enrollment");
            let current = self
                .users
                .get_by_id(&user.id)
                .await?
                .ok_or(ServiceError::UserNotFound)?;
            return Err(if current.has_2fa_enabled {
                ServiceError::MfaAlreadyEnabled
            } else {
                ServiceError::InvalidMfaCode
            });
        }

        self.sessions
            .set_mfa_expiry(&session.id, now + Duration::seconds(duration))
            .await?;
        self.sessions
            .expire_mfa_except(&user.id, &session.id, now)
            .await?;

        tracing::info!(user_id = %user.id, duration, "Two-factor authentication enabled");
        Ok(codes)
    }

    pub async fn disable(&self, user: &User) -> Result<(), ServiceError> {
        if !user.has_2fa_enabled {
            return Err(ServiceError::MfaNotEnabled);
        }

        if !self.users.disable_mfa(&user.id).await? {
            return Err(ServiceError::MfaNotEnabled);
        }

        tracing::info!(user_id = %user.id, "Two-factor authentication disabled");
        Ok(())
    }

    /// Replaces the user's recovery codes with ten new ones.
    pub async fn generate_recovery_codes(&self, user: &User) -> Result<Vec<String>, ServiceError> {
        let codes = generate_recovery_codes();

        self.users.set_recovery_codes(&user.id, &codes).await?;

        tracing::info!(user_id = %user.id, "Recovery codes regenerated");
        Ok(codes)
    }

    /// Accepts a current TOTP code or an unused recovery code, then reopens
    /// the session's MFA window.
    pub async fn verify_challenge(
        &self,
        user: &User,
        session: &Session,
        code: &str,
    ) -> Result<ChallengeOutcome, ServiceError> {
        self.verify_challenge_at(user, session, code, Utc::now())
            .await
    }

    pub async fn verify_challenge_at(
        &self,
        user: &User,
        session: &Session,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<ChallengeOutcome, ServiceError> {
        if !user.has_2fa_enabled {
            return Err(ServiceError::MfaNotEnabled);
        }
        let secret = user
            .totp_secret
            .as_deref()
            .ok_or(ServiceError::MfaNotProvisioned)?;

        let mut remaining = user.recovery_codes.len();
        let used_recovery_code = if self.check_code_at(secret, &user.email, code, now)? {
            false
        } else if let Some(pos) = find_recovery_code(&user.recovery_codes, code) {
            // Another request may have spent the same code since `user` was read.
            if !self
                .users
                .redeem_recovery_code(&user.id, &user.recovery_codes[pos])
                .await?
            {
                tracing::warn!(user_id = %user.id, "Recovery code already used");
                return Err(ServiceError::InvalidMfaCode);
            }
            remaining -= 1;
            tracing::warn!(
                user_id = %user.id,
                remaining,
                "Recovery code used for two-factor challenge"
            );
            true
        } else {
            tracing::warn!(user_id = %user.id, "Incorrect two-factor code submitted");
            return Err(ServiceError::InvalidMfaCode);
        };

        self.sessions
            .set_mfa_expiry(
                &session.id,
                now + Duration::seconds(user.auth_duration_or(FALLBACK_DURATION_SECONDS)),
            )
            .await?;

        Ok(ChallengeOutcome {
            used_recovery_code,
            remaining_recovery_codes: remaining,
        })
    }

    fn check_code_at(
        &self,
        secret: &str,
        account: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let code = code.trim();
        if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        let Ok(time) = u64::try_from(now.timestamp()) else {
            return Ok(false);
        };
        Ok(self.totp(secret, account)?.check(code, time))
    }
}

fn generate_recovery_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..RECOVERY_CODE_COUNT)
        .map(|_| generate_code(&mut rng))
        .collect()
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut bytes);
    // 256 is a multiple of the alphabet size, so this is unbiased.
    bytes
        .iter()
        .map(|b| RECOVERY_CODE_ALPHABET[(*b as usize) % RECOVERY_CODE_ALPHABET.len()] as char)
        .collect()
}

/// Strips separators and whitespace and uppercases.
pub fn normalize_recovery_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn find_recovery_code(codes: &[String], input: &str) -> Option<usize> {
    let candidate = normalize_recovery_code(input);
    if candidate.len() != RECOVERY_CODE_LEN {
        return None;
    }
    codes
        .iter()
        .position(|c| bool::from(c.as_bytes().ct_eq(candidate.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::{MemorySessionStore, MemoryUserStore};
    use crate::services::session::SessionSettings;

    struct Fixture {
        users: Arc<MemoryUserStore>,
        sessions: SessionService,
        mfa: MfaService,
    }

    async fn fixture() -> (Fixture, User, Session) {
        let users = Arc::new(MemoryUserStore::new());
        let sessions = SessionService::new(
            Arc::new(MemorySessionStore::new()),
            SessionSettings {
                list_max_age_seconds: 86400,
                default_mfa_duration_seconds: 3600,
            },
        );
        let mfa = MfaService::new(
            users.clone(),
            sessions.clone(),
            MfaSettings {
                issuer: "board".into(),
                default_duration_seconds: 3600,
                duration_options: vec![3600, 86400],
            },
        );

        let user = User::new("alice@example.com".into(), "alice".into(), "hash".into());
        users.insert(&user).await.unwrap();
        let id = sessions.create(&user, "ip", "ua").await.unwrap();
        let session = sessions.get(&id).await.unwrap();

        (
            Fixture {
                users,
                sessions,
                mfa,
            },
            user,
            session,
        )
    }

    fn code_at(mfa: &MfaService, user: &User, t: DateTime<Utc>) -> String {
        mfa.totp(user.totp_secret.as_deref().unwrap(), &user.email)
            .unwrap()
            .generate(t.timestamp() as u64)
    }

    async fn reload(f: &Fixture, id: &str) -> User {
        f.users.get_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_code_accepted_within_one_step() {
        let (f, user, _) = fixture().await;
        f.mfa.begin_enrollment(&user).await.unwrap();
        let user = reload(&f, &user.id).await;
        let secret = user.totp_secret.clone().unwrap();

        let t = Utc::now();
        let code = code_at(&f.mfa, &user, t);

        assert!(f.mfa.check_code_at(&secret, &user.email, &code, t).unwrap());
        assert!(f
            .mfa
            .check_code_at(&secret, &user.email, &code, t + Duration::seconds(30))
            .unwrap());
        assert!(f
            .mfa
            .check_code_at(&secret, &user.email, &code, t - Duration::seconds(30))
            .unwrap());
        assert!(!f
            .mfa
            .check_code_at(&secret, &user.email, &code, t + Duration::seconds(150))
            .unwrap());
    }

    #[tokio::test]
    async fn test_begin_enrollment_persists_secret_only() {
        let (f, user, _) = fixture().await;
        let enrollment = f.mfa.begin_enrollment(&user).await.unwrap();

        assert!(enrollment.qr_code.starts_with("data:image/png;base64,"));
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));

        let stored = reload(&f, &user.id).await;
        assert_eq!(stored.totp_secret.as_deref(), Some(enrollment.secret.as_str()));
        assert!(!stored.has_2fa_enabled);
    }

    #[tokio::test]
    async fn test_confirm_rejects_bad_code() {
        let (f, user, session) = fixture().await;
        f.mfa.begin_enrollment(&user).await.unwrap();
        let user = reload(&f, &user.id).await;

        let result = f
            .mfa
            .confirm_enrollment(&user, &session, "000000x", None)
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidMfaCode)));
        assert!(!reload(&f, &user.id).await.has_2fa_enabled);
    }

    #[tokio::test]
    async fn test_confirm_enables_and_extends_current_session() {
        let (f, user, session) = fixture().await;
        let other_id = f.sessions.create(&user, "ip2", "ua2").await.unwrap();
        f.mfa.begin_enrollment(&user).await.unwrap();
        let user = reload(&f, &user.id).await;

        let now = Utc::now();
        let code = code_at(&f.mfa, &user, now);
        let codes = f
            .mfa
            .confirm_enrollment_at(&user, &session, &code, Some(86400), now)
            .await
            .unwrap();

        assert_eq!(codes.len(), RECOVERY_CODE_COUNT);
        let stored = reload(&f, &user.id).await;
        assert!(stored.has_2fa_enabled);
        assert_eq!(stored.auth_duration_seconds, 86400);
        assert_eq!(stored.recovery_codes, codes);

        let current = f.sessions.get(&session.id).await.unwrap();
        assert_eq!(current.mfa_expires_at, now + Duration::seconds(86400));
        assert!(f.sessions.get(&other_id).await.unwrap().has_mfa_expired_at(now));

        assert!(matches!(
            f.mfa.begin_enrollment(&stored).await,
            Err(ServiceError::MfaAlreadyEnabled)
        ));
    }

    #[tokio::test]
    async fn test_confirm_rejects_unknown_duration() {
        let (f, user, session) = fixture().await;
        f.mfa.begin_enrollment(&user).await.unwrap();
        let user = reload(&f, &user.id).await;
        let now = Utc::now();
        let code = code_at(&f.mfa, &user, now);

        assert!(matches!(
            f.mfa
                .confirm_enrollment_at(&user, &session, &code, Some(42), now)
                .await,
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_recovery_code_is_single_use() {
        let (f, user, session) = fixture().await;
        f.mfa.begin_enrollment(&user).await.unwrap();
        let user = reload(&f, &user.id).await;
        let now = Utc::now();
        let code = code_at(&f.mfa, &user, now);
        let codes = f
            .mfa
            .confirm_enrollment_at(&user, &session, &code, None, now)
            .await
            .unwrap();
        let user = reload(&f, &user.id).await;

        let later = now + Duration::hours(2);
        let typed = format!("{}-{}", &codes[3][..6], &codes[3][6..]).to_lowercase();
        let outcome = f
            .mfa
            .verify_challenge_at(&user, &session, &typed, later)
            .await
            .unwrap();
        assert!(outcome.used_recovery_code);
        assert_eq!(outcome.remaining_recovery_codes, RECOVERY_CODE_COUNT - 1);
        assert_eq!(
            f.sessions.get(&session.id).await.unwrap().mfa_expires_at,
            later + Duration::seconds(3600)
        );

        let user = reload(&f, &user.id).await;
        assert!(matches!(
            f.mfa
                .verify_challenge_at(&user, &session, &codes[3], later)
                .await,
            Err(ServiceError::InvalidMfaCode)
        ));
    }

    async fn enrolled(f: &Fixture, user: &User, session: &Session) -> (User, Vec<String>) {
        f.mfa.begin_enrollment(user).await.unwrap();
        let user = reload(f, &user.id).await;
        let now = Utc::now();
        let code = code_at(&f.mfa, &user, now);
        let codes = f
            .mfa
            .confirm_enrollment_at(&user, session, &code, None, now)
            .await
            .unwrap();
        (reload(f, &user.id).await, codes)
    }

    #[tokio::test]
    async fn test_recovery_code_spent_once_across_stale_copies() {
        let (f, user, session) = fixture().await;
        let (user, codes) = enrolled(&f, &user, &session).await;

        // Two requests that loaded the user before either redeemed.
        let first_copy = user.clone();
        let second_copy = user.clone();
        let later = Utc::now() + Duration::hours(2);

        let first = f
            .mfa
            .verify_challenge_at(&first_copy, &session, &codes[0], later)
            .await;
        let second = f
            .mfa
            .verify_challenge_at(&second_copy, &session, &codes[0], later)
            .await;

        assert!(first.unwrap().used_recovery_code);
        assert!(matches!(second, Err(ServiceError::InvalidMfaCode)));
        assert_eq!(
            reload(&f, &user.id).await.recovery_codes.len(),
            RECOVERY_CODE_COUNT - 1
        );
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_revert_password() {
        let (f, user, session) = fixture().await;
        let (stale, _) = enrolled(&f, &user, &session).await;

        f.users.set_password_hash(&user.id, "new-hash").await.unwrap();
        f.mfa.generate_recovery_codes(&stale).await.unwrap();
        f.mfa.disable(&stale).await.unwrap();

        let stored = reload(&f, &user.id).await;
        assert_eq!(stored.password_hash, "new-hash");
        assert!(!stored.has_2fa_enabled);
    }

    #[tokio::test]
    async fn test_confirm_fails_after_enrollment_restarted() {
        let (f, user, session) = fixture().await;
        f.mfa.begin_enrollment(&user).await.unwrap();
        let first = reload(&f, &user.id).await;
        let now = Utc::now();
        let code = code_at(&f.mfa, &first, now);

        // A second enrollment replaces the secret the code was made for.
        f.mfa.begin_enrollment(&user).await.unwrap();

        assert!(matches!(
            f.mfa
                .confirm_enrollment_at(&first, &session, &code, None, now)
                .await,
            Err(ServiceError::InvalidMfaCode)
        ));
        assert!(!reload(&f, &user.id).await.has_2fa_enabled);
    }

    #[tokio::test]
    async fn test_disable_requires_enabled() {
        let (f, user, _) = fixture().await;
        assert!(matches!(
            f.mfa.disable(&user).await,
            Err(ServiceError::MfaNotEnabled)
        ));
    }

    #[test]
    fn test_recovery_code_shape() {
        let codes = generate_recovery_codes();
        assert_eq!(codes.len(), RECOVERY_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), RECOVERY_CODE_LEN);
            assert!(code.bytes().all(|b| RECOVERY_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_normalize_recovery_code() {
        assert_eq!(normalize_recovery_code(" abcd-efgh jklm "), "ABCDEFGHJKLM");
    }
}
