use spin_sdk::http::Response;
use std::fmt;
use thiserror::Error;

use crate::core::store::StoreError;

/// Failures of the user/post/follow/feed operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("you cannot {action} yourself")]
    SelfReferenceRejected { action: &'static str },

    #[error("invalid credentials")]
    InvalidCredential,

    #[error("{field} already taken")]
    Conflict { field: String },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DomainError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        DomainError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        DomainError::Invalid(msg.into())
    }

    /// Map a unique-index collision onto `Conflict`, naming the user-facing field.
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { field, .. } => DomainError::Conflict {
                field: field.rsplit('_').next().unwrap_or("value").to_string(),
            },
            other => DomainError::Store(other),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Conflict(String),
    InternalError(String),
}

impl ApiError {
    fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized => 401,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalError(_) => 500,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => msg,
            ApiError::Unauthorized => "Unauthorized",
            // internals stay in the log
            ApiError::InternalError(_) => "Internal server error",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        let body = serde_json::json!({ "error": err.message() }).to_string();
        Response::builder()
            .status(err.status())
            .header("Content-Type", "application/json")
            .body(body)
            .build()
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        log::error!("internal error: {:#}", err);
        ApiError::InternalError(err.to_string())
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            DomainError::SelfReferenceRejected { .. } | DomainError::Invalid(_) => ApiError::BadRequest(err.to_string()),
            DomainError::InvalidCredential => ApiError::Unauthorized,
            DomainError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            DomainError::Store(store) => {
                log::error!("store failure: {}", store);
                ApiError::InternalError(store.to_string())
            }
            DomainError::Internal(inner) => ApiError::from(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_name_the_field() {
        let err = DomainError::from_store(StoreError::DuplicateKey {
            collection: "users".into(),
            field: "users_email".into(),
            value: "a@b.c".into(),
        });
        assert_eq!(err.to_string(), "email already taken");
    }

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (DomainError::not_found("user", "zed"), 404),
            (DomainError::SelfReferenceRejected { action: "follow" }, 400),
            (DomainError::InvalidCredential, 401),
            (DomainError::Conflict { field: "username".into() }, 409),
            (DomainError::invalid("too long"), 400),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let resp: Response = ApiError::InternalError("disk on fire".into()).into();
        assert_eq!(*resp.status(), 500);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["error"], "Internal server error");
    }
}
