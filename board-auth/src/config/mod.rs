use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::middleware::security_headers::CspSources;
use std::env;

#[derive(Debug, Clone)]
pub struct BoardAuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub cookie: CookieConfig,
    pub session: SessionConfig,
    pub two_factor: TwoFactorConfig,
    pub mail: MailConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    MongoDb,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub sessions_collection: String,
    pub users_collection: String,
    pub password_resets_collection: String,
}

/// Hex-encoded key pair. The hash key authenticates, the block key encrypts.
#[derive(Debug, Clone)]
pub struct CookieKeyPair {
    pub hash_key: SecretString,
    pub block_key: SecretString,
}

impl CookieKeyPair {
    pub fn new(hash_key: &str, block_key: &str) -> Self {
        Self {
            hash_key: SecretString::new(hash_key.to_string()),
            block_key: SecretString::new(block_key.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    /// Current key pair first, then any previous pairs still accepted on decode.
    pub keys: Vec<CookieKeyPair>,
    pub max_age_seconds: i64,
    pub secure: bool,
}

impl CookieConfig {
    /// Decoded hash key of the current pair; also keys reset-token derivation.
    pub fn primary_hash_key(&self) -> Result<Vec<u8>, AppError> {
        let pair = self.keys.first().ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("At least one cookie key pair is required"))
        })?;
        hex::decode(pair.hash_key.expose_secret()).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("COOKIE_HASH_KEY must be hex: {}", e))
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display window for the active-sessions listing. Not enforced on authentication.
    pub list_max_age_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    pub default_duration_seconds: i64,
    pub duration_options: Vec<i64>,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_user: String,
    pub smtp_password: SecretString,
    pub from: String,
    pub site_domain: String,
    pub site_title: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub csp: CspSources,
    /// Key clients on the last `X-Forwarded-For` hop. Only safe behind a
    /// reverse proxy that appends it.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub sign_in_attempts: u32,
    pub sign_in_window_seconds: u64,
    pub forgot_attempts: u32,
    pub forgot_window_seconds: u64,
}

// Development-only keys. Production refuses to start without explicit keys.
const DEV_HASH_KEY: &str = "6465762d6f6e6c792d686173682d6b65792d6368616e67652d6d652d30303030";
const DEV_BLOCK_KEY: &str = "6465762d6f6e6c792d626c6f636b2d6b65792d6368616e67652d6d652d303030";

impl BoardAuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let backend: StoreBackend = get_env("STORE_BACKEND", Some("mongodb"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let uses_mongo = backend == StoreBackend::MongoDb;

        let cookie_max_age: i64 = parse_env("COOKIE_MAX_AGE_SECONDS", "2592000", is_prod)?;

        let mut keys = vec![CookieKeyPair::new(
            &get_env("COOKIE_HASH_KEY", Some(DEV_HASH_KEY), is_prod)?,
            &get_env("COOKIE_BLOCK_KEY", Some(DEV_BLOCK_KEY), is_prod)?,
        )];
        if let (Ok(hash), Ok(block)) = (
            env::var("COOKIE_PREVIOUS_HASH_KEY"),
            env::var("COOKIE_PREVIOUS_BLOCK_KEY"),
        ) {
            keys.push(CookieKeyPair::new(&hash, &block));
        }

        let config = BoardAuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("board-auth"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store: StoreConfig {
                backend,
                mongodb_uri: get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod && uses_mongo,
                )?,
                mongodb_database: get_env("MONGODB_DATABASE", Some("board"), is_prod && uses_mongo)?,
                sessions_collection: get_env("SESSIONS_COLLECTION", Some("sessions"), false)?,
                users_collection: get_env("USERS_COLLECTION", Some("users"), false)?,
                password_resets_collection: get_env(
                    "PASSWORD_RESETS_COLLECTION",
                    Some("password_resets"),
                    false,
                )?,
            },
            cookie: CookieConfig {
                name: get_env("SESSION_COOKIE_NAME", Some("sid"), false)?,
                keys,
                max_age_seconds: cookie_max_age,
                secure: parse_env("COOKIE_SECURE", if is_prod { "true" } else { "false" }, false)?,
            },
            session: SessionConfig {
                list_max_age_seconds: parse_env(
                    "SESSION_LIST_MAX_AGE_SECONDS",
                    &cookie_max_age.to_string(),
                    false,
                )?,
            },
            two_factor: TwoFactorConfig {
                default_duration_seconds: parse_env(
                    "TWO_FACTOR_DEFAULT_DURATION_SECONDS",
                    "3600",
                    false,
                )?,
                duration_options: get_env(
                    "TWO_FACTOR_DURATION_OPTIONS",
                    Some("3600,86400,259200,604800"),
                    false,
                )?
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim().parse::<i64>().map_err(|e| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "TWO_FACTOR_DURATION_OPTIONS: {}",
                            e
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
                issuer: get_env("TWO_FACTOR_ISSUER", Some("board"), false)?,
            },
            mail: MailConfig {
                smtp_host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                smtp_user: get_env("SMTP_USER", Some(""), is_prod)?,
                smtp_password: SecretString::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from: get_env("MAIL_FROM", Some("board <noreply@localhost>"), is_prod)?,
                site_domain: get_env("SITE_DOMAIN", Some("localhost:8080"), is_prod)?,
                site_title: get_env("SITE_TITLE", Some("board"), false)?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(
                    &get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?,
                    ',',
                ),
                csp: CspSources {
                    default_src: split_list(&env::var("CSP_DEFAULT_SRC").unwrap_or_default(), ' '),
                    child_src: split_list(&env::var("CSP_CHILD_SRC").unwrap_or_default(), ' '),
                    img_src: split_list(&env::var("CSP_IMG_SRC").unwrap_or_default(), ' '),
                },
                trust_proxy: parse_env("TRUST_PROXY", "false", false)?,
            },
            rate_limit: RateLimitConfig {
                sign_in_attempts: parse_env("RATE_LIMIT_SIGN_IN_ATTEMPTS", "5", false)?,
                sign_in_window_seconds: parse_env(
                    "RATE_LIMIT_SIGN_IN_WINDOW_SECONDS",
                    "900",
                    false,
                )?,
                forgot_attempts: parse_env("RATE_LIMIT_FORGOT_ATTEMPTS", "3", false)?,
                forgot_window_seconds: parse_env(
                    "RATE_LIMIT_FORGOT_WINDOW_SECONDS",
                    "3600",
                    false,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.cookie.keys.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "At least one cookie key pair is required"
            )));
        }

        for pair in &self.cookie.keys {
            let hash_key = hex::decode(pair.hash_key.expose_secret()).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("COOKIE_HASH_KEY must be hex: {}", e))
            })?;
            if hash_key.is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "COOKIE_HASH_KEY must not be empty"
                )));
            }

            let block_key = hex::decode(pair.block_key.expose_secret()).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("COOKIE_BLOCK_KEY must be hex: {}", e))
            })?;
            if block_key.len() != 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "COOKIE_BLOCK_KEY must decode to exactly 32 bytes"
                )));
            }
        }

        if self.cookie.max_age_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "COOKIE_MAX_AGE_SECONDS must be positive"
            )));
        }

        if self.session.list_max_age_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_LIST_MAX_AGE_SECONDS must be positive"
            )));
        }

        if self.two_factor.default_duration_seconds <= 0
            || self.two_factor.duration_options.iter().any(|d| *d <= 0)
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Two-factor durations must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.store.backend == StoreBackend::Memory {
                tracing::warn!("In-memory store selected in production; sessions will not survive a restart");
            }

            if !self.cookie.secure {
                tracing::warn!("Session cookie is not marked Secure in production");
            }
        }

        Ok(())
    }

    /// Configuration with development defaults and no environment lookups.
    pub fn for_tests() -> Self {
        BoardAuthConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "board-auth".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            store: StoreConfig {
                backend: StoreBackend::Memory,
                mongodb_uri: "mongodb://localhost:27017".to_string(),
                mongodb_database: "board_test".to_string(),
                sessions_collection: "sessions".to_string(),
                users_collection: "users".to_string(),
                password_resets_collection: "password_resets".to_string(),
            },
            cookie: CookieConfig {
                name: "sid".to_string(),
                keys: vec![CookieKeyPair::new(DEV_HASH_KEY, DEV_BLOCK_KEY)],
                max_age_seconds: 2_592_000,
                secure: false,
            },
            session: SessionConfig {
                list_max_age_seconds: 2_592_000,
            },
            two_factor: TwoFactorConfig {
                default_duration_seconds: 3600,
                duration_options: vec![3600, 86400, 259200, 604800],
                issuer: "board".to_string(),
            },
            mail: MailConfig {
                smtp_host: "localhost".to_string(),
                smtp_user: String::new(),
                smtp_password: SecretString::new(String::new()),
                from: "board <noreply@localhost>".to_string(),
                site_domain: "localhost:8080".to_string(),
                site_title: "board".to_string(),
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
                csp: CspSources::default(),
                trust_proxy: false,
            },
            rate_limit: RateLimitConfig {
                sign_in_attempts: 100,
                sign_in_window_seconds: 60,
                forgot_attempts: 100,
                forgot_window_seconds: 60,
            },
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_env(key, Some(default), is_prod)?)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn split_list(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(StoreBackend::MongoDb),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}
