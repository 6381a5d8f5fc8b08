use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::AppError;

/// Role a caller must hold to reach administrative endpoints.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Deserialize)]
struct Claims {
    sub: String,
    role: String,
    #[allow(dead_code)]
    exp: usize,
}

pub struct AuthUser {
    pub principal: String,
    pub role: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
            .ok_or(AppError::Unauthorized)?;
        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized)?;
        Ok(AuthUser {
            principal: decoded.claims.sub,
            role: decoded.claims.role,
        })
    }
}

/// An authenticated caller holding [`ADMIN_ROLE`]. Every attempt is logged
/// with the caller, forwarded client address and endpoint.
pub struct AdminUser {
    pub principal: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        let forwarded_for = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let endpoint = parts.uri.path().to_string();

        if user.role != ADMIN_ROLE {
            tracing::warn!(
                principal = %user.principal,
                %forwarded_for,
                %endpoint,
                "non-admin principal denied admin endpoint"
            );
            return Err(AppError::Forbidden);
        }

        tracing::info!(
            principal = %user.principal,
            %forwarded_for,
            %endpoint,
            "admin endpoint accessed"
        );
        Ok(AdminUser {
            principal: user.principal,
        })
    }
}
