use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use spin_sdk::http::{Request, Response};

use crate::core::errors::ApiError;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// URL-safe random token of `len` bytes of entropy.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn avatar_url(email: &str, size: u32) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!("https://www.gravatar.com/avatar/{:x}?d=identicon&s={}", digest, size)
}

/// Clamp a caller-supplied page number to 1 or more.
pub fn clamp_page(page: i64) -> u64 {
    page.max(1) as u64
}

/// Rows preceding the 1-based `page`. Saturates instead of truncating on 32-bit targets.
pub fn page_offset(page: u64, per_page: usize) -> usize {
    usize::try_from(page.saturating_sub(1))
        .unwrap_or(usize::MAX)
        .saturating_mul(per_page)
}

pub fn json_response<T: Serialize>(status: u16, value: &T) -> Result<Response, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .build())
}

pub fn empty_response(status: u16) -> Response {
    Response::builder().status(status).body(Vec::<u8>::new()).build()
}

pub fn parse_json_body<T: DeserializeOwned>(req: &Request) -> Result<T, ApiError> {
    serde_json::from_slice(req.body()).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// Last path segment after `prefix`, URL-decoded. Empty segments are rejected.
pub fn path_param(path: &str, prefix: &str) -> Result<String, ApiError> {
    let raw = path.strip_prefix(prefix).unwrap_or_default().trim_end_matches('/');
    if raw.is_empty() || raw.contains('/') {
        return Err(ApiError::BadRequest("Missing path parameter".to_string()));
    }
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| ApiError::BadRequest("Malformed path parameter".to_string()))
}
