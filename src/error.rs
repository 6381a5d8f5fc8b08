use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failure modes of the key lifecycle engine and its collaborators.
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),
    #[error("invalid key policy: {0}")]
    InvalidPolicyShape(String),
    #[error("kms key {key_id} in {region} is disabled or scheduled for deletion")]
    KeyUnusable { key_id: String, region: String },
    #[error("kms {operation} failed: {message}")]
    RemoteService {
        operation: &'static str,
        message: String,
    },
    #[error("kms key {0} not found")]
    NotFoundRemote(String),
    #[error("no kms key record for role {role_id} in {region}")]
    RecordNotFound { role_id: String, region: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl KmsError {
    pub fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        KmsError::RemoteService {
            operation,
            message: message.into(),
        }
    }
}

pub type KmsResult<T> = Result<T, KmsError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Kms(#[from] KmsError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Kms(KmsError::RecordNotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Kms(KmsError::MalformedIdentifier(_))
            | AppError::Kms(KmsError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            AppError::Kms(KmsError::KeyUnusable { .. }) => StatusCode::CONFLICT,
            AppError::Kms(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_record_is_a_client_visible_not_found() {
        let err = AppError::from(KmsError::RecordNotFound {
            role_id: "role-1".into(),
            region: "us-west-2".into(),
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unusable_key_and_bad_arn_are_client_faults() {
        let unusable = AppError::from(KmsError::KeyUnusable {
            key_id: "arn:aws:kms:us-west-2:111122223333:key/abc".into(),
            region: "us-west-2".into(),
        });
        assert_eq!(unusable.status(), StatusCode::CONFLICT);

        let malformed = AppError::from(KmsError::MalformedIdentifier("hullabaloo".into()));
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn remote_failures_are_server_errors() {
        let err = AppError::from(KmsError::remote("DescribeKey", "throttled"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "kms DescribeKey failed: throttled");
    }
}
