// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login token codec.
//!
//! ## Wire Format
//!
//! ```text
//! base64url( IV(16) || AES-CBC(PKCS7(plaintext)) || HMAC-SHA1(IV || ciphertext)(20) )
//! ```
//!
//! Plaintext:
//!
//! ```text
//! time=YYYY-MM-DD HH:MM:SS|username=<username>|name=<first> <last>|email=<email>
//! ```
//!
//! ## Security
//!
//! - The MAC covers the IV and the ciphertext and is verified in constant
//!   time before anything is decrypted
//! - A fresh IV is drawn from the system CSPRNG for every token
//! - The identity fields live inside the authenticated plaintext, so they
//!   cannot be altered after issuance
//! - Expiry and replay are checked by the caller, not here

use std::fmt;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64ct::{Base64Url, Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha1::Sha1;

use super::error::AuthError;
use crate::config::ConfigError;

type HmacSha1 = Hmac<Sha1>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block and IV size.
pub const IV_LEN: usize = 16;
/// HMAC-SHA1 digest size.
pub const MAC_LEN: usize = 20;
/// Minimum accepted HMAC key length.
pub const MIN_HMAC_KEY_LEN: usize = 16;
/// Timestamp layout inside the plaintext.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone)]
enum AesKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

/// Identity data recovered from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginData {
    /// Issuance time embedded by the identity provider (UTC).
    pub timestamp: NaiveDateTime,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl LoginData {
    /// Issuance time as a UTC instant.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.timestamp.and_utc()
    }

    /// Reject tokens issued before `now - expiration`.
    ///
    /// A token issued exactly at `now - expiration` is still valid.
    pub fn check_expiry(&self, now: DateTime<Utc>, expiration: Duration) -> Result<(), AuthError> {
        check_expiry(self.issued_at(), now, expiration)
    }
}

/// Fail with [`AuthError::Expired`] iff `issued_at < now - expiration`.
pub fn check_expiry(
    issued_at: DateTime<Utc>,
    now: DateTime<Utc>,
    expiration: Duration,
) -> Result<(), AuthError> {
    if issued_at < now - expiration {
        return Err(AuthError::Expired);
    }
    Ok(())
}

/// Encoder/decoder for login tokens.
#[derive(Clone)]
pub struct TokenCodec {
    aes_key: AesKey,
    hmac_key: Vec<u8>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cipher = match self.aes_key {
            AesKey::Aes128(_) => "aes-128-cbc",
            AesKey::Aes256(_) => "aes-256-cbc",
        };
        f.debug_struct("TokenCodec")
            .field("cipher", &cipher)
            .field("hmac_key", &"<redacted>")
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec.
    ///
    /// The AES key selects AES-128 (16 bytes) or AES-256 (32 bytes); the
    /// HMAC key must be at least 16 bytes.
    pub fn new(aes_key: &[u8], hmac_key: &[u8]) -> Result<Self, ConfigError> {
        let aes_key = match aes_key.len() {
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(aes_key);
                AesKey::Aes128(key)
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(aes_key);
                AesKey::Aes256(key)
            }
            actual => {
                return Err(ConfigError::InvalidKeyLength {
                    name: "aes_key",
                    expected: "16 or 32",
                    actual,
                })
            }
        };

        if hmac_key.len() < MIN_HMAC_KEY_LEN {
            return Err(ConfigError::InvalidKeyLength {
                name: "hmac_key",
                expected: "at least 16",
                actual: hmac_key.len(),
            });
        }

        Ok(Self {
            aes_key,
            hmac_key: hmac_key.to_vec(),
        })
    }

    /// Issue a token stamped with the current UTC time.
    pub fn encode(
        &self,
        email: &str,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<String, AuthError> {
        self.encode_at(email, username, first_name, last_name, Utc::now().naive_utc())
    }

    /// Issue a token stamped with `issued_at`.
    pub fn encode_at(
        &self,
        email: &str,
        username: &str,
        first_name: &str,
        last_name: &str,
        issued_at: NaiveDateTime,
    ) -> Result<String, AuthError> {
        let message = format!(
            "time={}|username={username}|name={first_name} {last_name}|email={email}",
            issued_at.format(TIMESTAMP_FORMAT)
        );

        let mut iv = [0u8; IV_LEN];
        SystemRandom::new()
            .fill(&mut iv)
            .map_err(|_| AuthError::Internal("system random source unavailable".to_string()))?;

        let ciphertext = self.encrypt(&iv, message.as_bytes())?;

        let mut token = Vec::with_capacity(IV_LEN + ciphertext.len() + MAC_LEN);
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = self.mac()?;
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        Ok(Base64Url::encode_string(&token))
    }

    /// Validate and decrypt a token. Only padded base64url is accepted.
    pub fn decode(&self, token: &str) -> Result<LoginData, AuthError> {
        let raw = Base64Url::decode_vec(token.trim()).map_err(|_| AuthError::MalformedToken)?;

        if raw.len() < MAC_LEN {
            return Err(AuthError::Signature);
        }
        let (mac_input, digest) = raw.split_at(raw.len() - MAC_LEN);

        let mut mac = self.mac()?;
        mac.update(mac_input);
        mac.verify_slice(digest).map_err(|_| AuthError::Signature)?;

        if mac_input.len() < IV_LEN {
            return Err(AuthError::MalformedPayload);
        }
        let (iv, ciphertext) = mac_input.split_at(IV_LEN);
        let plaintext = self.decrypt(iv, ciphertext)?;
        let message = String::from_utf8(plaintext).map_err(|_| AuthError::MalformedPayload)?;

        parse_login_data(&message)
    }

    /// The padded form of `token`, used as its replay key.
    ///
    /// Either padding form maps to the same key, so stripping `=` cannot
    /// dodge the replay guard. No key material is involved.
    pub fn replay_key(token: &str) -> Result<String, AuthError> {
        let token = token.trim();
        let raw = Base64Url::decode_vec(token)
            .or_else(|_| Base64UrlUnpadded::decode_vec(token))
            .map_err(|_| AuthError::MalformedToken)?;
        Ok(Base64Url::encode_string(&raw))
    }

    fn mac(&self) -> Result<HmacSha1, AuthError> {
        <HmacSha1 as Mac>::new_from_slice(&self.hmac_key)
            .map_err(|e| AuthError::Internal(format!("HMAC init failed: {e}")))
    }

    fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, AuthError> {
        let init_err = |e| AuthError::Internal(format!("cipher init failed: {e}"));
        let ciphertext = match &self.aes_key {
            AesKey::Aes128(key) => Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(init_err)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            AesKey::Aes256(key) => Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(init_err)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };
        Ok(ciphertext)
    }

    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AuthError> {
        if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
            return Err(AuthError::MalformedPayload);
        }
        let init_err = |e| AuthError::Internal(format!("cipher init failed: {e}"));
        let plaintext = match &self.aes_key {
            AesKey::Aes128(key) => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(init_err)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            AesKey::Aes256(key) => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(init_err)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        plaintext.map_err(|_| AuthError::MalformedPayload)
    }
}

/// Parse `time={t}|username={u}|name={n}|email={e}`.
///
/// Each field ends at the first separator that introduces the next one;
/// the email runs to the end of the message.
fn parse_login_data(message: &str) -> Result<LoginData, AuthError> {
    let fields = || -> Option<(&str, &str, &str, &str)> {
        let start = message.find("time=")?;
        let rest = &message[start + "time=".len()..];
        let (time, rest) = rest.split_once("|username=")?;
        let (username, rest) = rest.split_once("|name=")?;
        let (name, email) = rest.split_once("|email=")?;
        Some((time, username, name, email))
    };
    let (time, username, name, email) = fields().ok_or(AuthError::MalformedPayload)?;

    let timestamp = NaiveDateTime::parse_from_str(time.trim(), TIMESTAMP_FORMAT)
        .map_err(|_| AuthError::MalformedPayload)?;

    let mut parts = name.trim().split(' ');
    let first_name = parts.next().unwrap_or_default().to_string();
    let last_name = parts.collect::<Vec<_>>().join(" ");

    Ok(LoginData {
        timestamp,
        username: username.to_string(),
        first_name,
        last_name,
        email: sanitize_email(email),
    })
}

/// Trim the email and drop control characters.
fn sanitize_email(email: &str) -> String {
    email.trim().chars().filter(|c| !c.is_control()).collect()
}
