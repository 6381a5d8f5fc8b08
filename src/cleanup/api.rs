use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{CleanUpRequest, CleanUpService};
use crate::error::AppResult;
use crate::extractor::AdminUser;

/// key: kms-cleanup-api -> PUT /v1/cleanup
/// Starts a sweep in the background and answers immediately.
pub async fn clean_up(
    admin: AdminUser,
    Extension(service): Extension<Arc<CleanUpService>>,
    Extension(shutdown): Extension<CancellationToken>,
    Json(request): Json<CleanUpRequest>,
) -> AppResult<StatusCode> {
    service.threshold_days(&request)?;

    info!(
        principal = %admin.principal,
        kms_expiration_period_in_days = ?request.kms_expiration_period_in_days,
        "kms clean up requested"
    );
    tokio::spawn(async move {
        if let Err(err) = service.clean_up(request, &shutdown).await {
            warn!(?err, "requested kms clean up failed");
        }
    });
    Ok(StatusCode::NO_CONTENT)
}
