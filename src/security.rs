use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Settings;

const NONCE_LEN: usize = 12;
const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("age cipher failed")]
    Cipher,
    #[error("stored age is not a number")]
    AgeFormat,
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

fn password_bytes(password: &str) -> &[u8] {
    let b = password.as_bytes();
    &b[..b.len().min(MAX_PASSWORD_BYTES)]
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password_bytes(password), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password_bytes(password), &parsed)
        .is_ok()
}

/// Encrypts an age for storage as `nonce || ciphertext`.
pub fn encrypt_age(key: &[u8; 32], age: i64) -> Result<Vec<u8>, AuthError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuthError::Cipher)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, age.to_string().as_bytes())
        .map_err(|_| AuthError::Cipher)?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn decrypt_age(key: &[u8; 32], blob: &[u8]) -> Result<i64, AuthError> {
    if blob.len() <= NONCE_LEN {
        return Err(AuthError::Cipher);
    }
    let (nonce, sealed) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuthError::Cipher)?;
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| AuthError::Cipher)?;
    std::str::from_utf8(&plain)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(AuthError::AgeFormat)
}

pub fn create_access_token(settings: &Settings, username: &str) -> Result<IssuedToken, AuthError> {
    let now = Utc::now();
    let expires_at = now + Duration::minutes(settings.access_token_expire_minutes);
    let claims = Claims {
        sub: username.to_string(),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(settings.secret_key.as_bytes()),
    )?;
    Ok(IssuedToken { token, expires_at })
}

pub fn decode_access_token(settings: &Settings, token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.secret_key.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Hex sha256 of a token; the sessions table stores this instead of the token.
pub fn token_fingerprint(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
