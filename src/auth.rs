use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use spin_sdk::http::Request;

use crate::config::*;
use crate::core::errors::{ApiError, DomainError};
use crate::core::helpers::random_token;
use crate::core::store::{find_first, set_fields, DocumentStore, Filter};
use crate::models::models::User;
use crate::users::UserDirectory;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    sub: String,
    exp: i64,
}

/// Bearer tokens and password-reset credentials.
pub struct Credentials<'a, S: ?Sized> {
    store: &'a S,
    settings: &'a Settings,
}

impl<'a, S: DocumentStore + ?Sized> Credentials<'a, S> {
    pub fn new(store: &'a S, settings: &'a Settings) -> Self {
        Self { store, settings }
    }

    /// Current token if it outlives the reuse margin, otherwise a fresh one.
    pub fn get_token(&self, user_id: &str, now: DateTime<Utc>) -> Result<String, DomainError> {
        let users = UserDirectory::new(self.store);
        let user = users.get(user_id)?;

        if let (Some(token), Some(expires)) = (&user.token, user.token_expiration) {
            if expires > now + Duration::seconds(TOKEN_REUSE_MARGIN_SECS) {
                return Ok(token.clone());
            }
        }

        let token = random_token(32);
        let expires = now + Duration::seconds(self.settings.token_ttl_secs);
        users.set(
            user_id,
            set_fields([
                ("token", Value::String(token.clone())),
                ("token_expiration", Value::from(expires.timestamp_micros())),
            ]),
        )?;
        log::info!("issued token for user {}", user_id);
        Ok(token)
    }

    pub fn revoke_token(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        let expired = now - Duration::seconds(1);
        UserDirectory::new(self.store).set(
            user_id,
            set_fields([("token_expiration", expired.timestamp_micros())]),
        )?;
        log::info!("revoked token for user {}", user_id);
        Ok(())
    }

    /// Owner of `token`, if it exists and has not expired.
    pub fn check_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>, DomainError> {
        if token.is_empty() {
            return Ok(None);
        }
        let user: Option<User> = find_first(self.store, USERS, &Filter::eq("token", token))?;
        Ok(user.filter(|u| u.token_expiration.is_some_and(|exp| exp > now)))
    }

    pub fn issue_reset_token(&self, user: &User, now: DateTime<Utc>) -> Result<String, DomainError> {
        let claims = ResetClaims {
            sub: user.id.clone(),
            exp: (now + Duration::seconds(self.settings.reset_token_ttl_secs)).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).map_err(anyhow::Error::from)?);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    /// User a reset token was issued for. Any defect in the token yields `None`.
    pub fn verify_reset_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>, DomainError> {
        let Some(claims) = self.decode_reset_token(token)? else {
            log::warn!("rejected malformed or forged reset token");
            return Ok(None);
        };
        if claims.exp <= now.timestamp() {
            log::debug!("reset token for {} expired", claims.sub);
            return Ok(None);
        }
        UserDirectory::new(self.store).find_by_id(&claims.sub)
    }

    fn decode_reset_token(&self, token: &str) -> Result<Option<ResetClaims>, DomainError> {
        let Some((payload, signature)) = token.split_once('.') else {
            return Ok(None);
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return Ok(None);
        };
        if self.mac(payload)?.verify_slice(&signature).is_err() {
            return Ok(None);
        }
        let claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ResetClaims>(&bytes).ok());
        Ok(claims)
    }

    fn mac(&self, payload: &str) -> anyhow::Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.settings.secret_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid secret key: {}", e))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(req: &Request) -> Option<&str> {
    req.header("Authorization")?
        .as_str()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller of an authenticated route.
pub fn authenticate<S: DocumentStore + ?Sized>(
    req: &Request,
    store: &S,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<User, ApiError> {
    let token = bearer_token(req).ok_or(ApiError::Unauthorized)?;
    Credentials::new(store, settings)
        .check_token(token, now)?
        .ok_or(ApiError::Unauthorized)
}
