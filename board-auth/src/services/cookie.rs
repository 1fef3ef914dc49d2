//! Authenticated, encrypted session cookies.
//!
//! A cookie value is `timestamp.payload.mac`, each part base64url without
//! padding. `payload` is `nonce || ciphertext` from ChaCha20-Poly1305 under the
//! block key with the cookie name as associated data; `mac` is HMAC-SHA256
//! under the hash key over `name|timestamp|payload`. Decoding checks the MAC
//! first and fails closed on any mismatch.

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use sha2::Sha256;
use thiserror::Error;

use crate::config::CookieConfig;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie value is malformed")]
    Malformed,

    #[error("cookie signature is invalid")]
    InvalidMac,

    #[error("cookie has expired")]
    Expired,

    #[error("cookie payload could not be decrypted")]
    Decrypt,

    #[error("cookie payload could not be encrypted")]
    Encrypt,

    #[error("invalid cookie key: {0}")]
    InvalidKey(String),
}

/// One hash/block key pair.
#[derive(Clone)]
pub struct SecureCookie {
    hash_key: Vec<u8>,
    cipher: ChaCha20Poly1305,
}

impl SecureCookie {
    pub fn new(hash_key: &[u8], block_key: &[u8]) -> Result<Self, CookieError> {
        if hash_key.is_empty() {
            return Err(CookieError::InvalidKey("hash key is empty".to_string()));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(block_key)
            .map_err(|_| CookieError::InvalidKey("block key must be 32 bytes".to_string()))?;

        Ok(Self {
            hash_key: hash_key.to_vec(),
            cipher,
        })
    }

    fn mac(&self, name: &str, timestamp: &str, payload: &str) -> Result<HmacSha256, CookieError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hash_key)
            .map_err(|e| CookieError::InvalidKey(e.to_string()))?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn encode(&self, name: &str, value: &str, timestamp: i64) -> Result<String, CookieError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: value.as_bytes(),
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        let timestamp = timestamp.to_string();
        let payload = URL_SAFE_NO_PAD.encode(sealed);
        let tag = self.mac(name, &timestamp, &payload)?.finalize().into_bytes();

        Ok(format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(timestamp.as_bytes()),
            payload,
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// `max_age` of zero disables the age check.
    pub fn decode(
        &self,
        name: &str,
        encoded: &str,
        now: i64,
        max_age: i64,
    ) -> Result<String, CookieError> {
        let mut parts = encoded.split('.');
        let (Some(ts_part), Some(payload), Some(tag_part), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CookieError::Malformed);
        };

        let timestamp = URL_SAFE_NO_PAD
            .decode(ts_part)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or(CookieError::Malformed)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_part)
            .map_err(|_| CookieError::Malformed)?;

        self.mac(name, &timestamp, payload)?
            .verify_slice(&tag)
            .map_err(|_| CookieError::InvalidMac)?;

        let issued: i64 = timestamp.parse().map_err(|_| CookieError::Malformed)?;
        if max_age > 0 && issued < now - max_age {
            return Err(CookieError::Expired);
        }

        let sealed = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CookieError::Malformed)?;
        if sealed.len() < NONCE_LEN {
            return Err(CookieError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CookieError::Malformed)
    }
}

/// Session cookie codec. Encodes with the first key pair and accepts any
/// configured pair on decode, so keys can be rotated without signing everyone out.
#[derive(Clone)]
pub struct CookieCodec {
    name: String,
    codecs: Vec<SecureCookie>,
    max_age_seconds: i64,
    secure: bool,
}

impl CookieCodec {
    pub fn new(
        name: impl Into<String>,
        codecs: Vec<SecureCookie>,
        max_age_seconds: i64,
        secure: bool,
    ) -> Result<Self, CookieError> {
        if codecs.is_empty() {
            return Err(CookieError::InvalidKey("no key pairs configured".to_string()));
        }
        Ok(Self {
            name: name.into(),
            codecs,
            max_age_seconds,
            secure,
        })
    }

    pub fn from_config(config: &CookieConfig) -> Result<Self, CookieError> {
        let codecs = config
            .keys
            .iter()
            .map(|pair| {
                let hash_key = hex::decode(pair.hash_key.expose_secret())
                    .map_err(|e| CookieError::InvalidKey(e.to_string()))?;
                let block_key = hex::decode(pair.block_key.expose_secret())
                    .map_err(|e| CookieError::InvalidKey(e.to_string()))?;
                SecureCookie::new(&hash_key, &block_key)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(
            config.name.clone(),
            codecs,
            config.max_age_seconds,
            config.secure,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_age_seconds(&self) -> i64 {
        self.max_age_seconds
    }

    pub fn encode(&self, value: &str) -> Result<String, CookieError> {
        self.encode_at(value, Utc::now().timestamp())
    }

    pub fn encode_at(&self, value: &str, timestamp: i64) -> Result<String, CookieError> {
        // `new` guarantees at least one pair.
        let current = self.codecs.first().ok_or(CookieError::Malformed)?;
        current.encode(&self.name, value, timestamp)
    }

    pub fn decode(&self, encoded: &str) -> Result<String, CookieError> {
        self.decode_at(encoded, Utc::now().timestamp())
    }

    /// Tries each key pair in order and reports the first pair's error if none match.
    pub fn decode_at(&self, encoded: &str, now: i64) -> Result<String, CookieError> {
        let mut first_err = None;
        for codec in &self.codecs {
            match codec.decode(&self.name, encoded, now, self.max_age_seconds) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err.unwrap_or(CookieError::Malformed))
    }

    /// `Set-Cookie` carrying the encrypted session id.
    pub fn session_cookie(&self, session_id: &str) -> Result<Cookie<'static>, CookieError> {
        let value = self.encode(session_id)?;
        Ok(Cookie::build((self.name.clone(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.max_age_seconds))
            .build())
    }

    /// `Set-Cookie` that makes the browser drop the session cookie.
    pub fn expired_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.name.clone(), ""))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .max_age(time::Duration::ZERO)
            .expires(time::OffsetDateTime::UNIX_EPOCH)
            .build()
    }
}
