//! GET /api/v1/shared/:token: anonymous read of a shared proposal.

use std::sync::Arc;

use axum::{Extension, Json};
use portal_core::service::SharedProposal;
use portal_core::Portal;

use crate::error::AppError;
use crate::extract::ApiPath;

pub async fn shared_proposal(
    Extension(portal): Extension<Arc<Portal>>,
    ApiPath(token): ApiPath<String>,
) -> Result<Json<SharedProposal>, AppError> {
    Ok(Json(portal.shared_proposal(&token).await?))
}
