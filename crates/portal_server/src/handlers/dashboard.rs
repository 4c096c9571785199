use std::sync::Arc;

use axum::{Extension, Json};
use portal_core::dashboard::DashboardSummary;
use portal_core::principal::Principal;
use portal_core::Portal;

use crate::error::AppError;

pub async fn summary(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<DashboardSummary>, AppError> {
    Ok(Json(portal.dashboard_summary(&principal).await?))
}
