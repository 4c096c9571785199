//! Router construction for the portal server.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{
    middleware as axum_mw,
    routing::{get, post, put},
    Extension, Router,
};
use portal_core::Portal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers;
use crate::middleware::jwt::{jwt_auth, JwtConfig};

/// Multipart framing allowance on top of the configured file size limit.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// HTTP-facing settings that are not part of the portal service.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub cors_origins: Vec<String>,
    pub public_base_url: String,
}

impl HttpOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            cors_origins: config.cors_origins.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            cors_origins: vec!["http://localhost:3000".into()],
            public_base_url: "http://localhost:3000".into(),
        }
    }
}

/// Builds links handed to people outside the API.
#[derive(Debug, Clone)]
pub struct PublicLinks {
    base_url: Arc<str>,
}

impl PublicLinks {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').into(),
        }
    }

    pub fn shared_proposal_url(&self, token: &str) -> String {
        format!("{}/shared/{token}", self.base_url)
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the full axum router with all routes and middleware.
pub fn build_router(portal: Arc<Portal>, jwt_config: JwtConfig, options: &HttpOptions) -> Router {
    let upload_limit = usize::try_from(
        portal
            .settings()
            .upload
            .max_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES),
    )
    .unwrap_or(usize::MAX);

    // Routes that require JWT authentication
    let protected = Router::new()
        // Auth / users
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .route(
            "/users/me",
            get(handlers::users::get_me).put(handlers::users::update_me),
        )
        .route(
            "/users/me/change-password",
            post(handlers::users::change_password),
        )
        .route("/users", get(handlers::users::list_users))
        .route(
            "/users/:id",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        // Admin
        .route("/admin/users", post(handlers::admin::create_user))
        .route("/admin/users/:id/role", put(handlers::admin::set_role))
        .route("/admin/users/:id/status", put(handlers::admin::set_status))
        .route(
            "/admin/users/:id/force-logout",
            post(handlers::admin::force_logout),
        )
        .route("/admin/stats/users", get(handlers::admin::user_stats))
        .route(
            "/admin/maintenance/cleanup-tokens",
            post(handlers::admin::cleanup_tokens),
        )
        // Proposals
        .route(
            "/proposals",
            get(handlers::proposals::list_proposals).post(handlers::proposals::create_proposal),
        )
        .route(
            "/proposals/:id",
            get(handlers::proposals::get_proposal)
                .put(handlers::proposals::update_proposal)
                .delete(handlers::proposals::delete_proposal),
        )
        .route(
            "/proposals/:id/transition",
            post(handlers::proposals::transition),
        )
        .route(
            "/proposals/:id/versions",
            get(handlers::proposals::list_versions),
        )
        .route("/proposals/:id/history", get(handlers::proposals::history))
        .route("/proposals/:id/share", post(handlers::proposals::share))
        .route(
            "/proposals/:id/shares/:share_id",
            axum::routing::delete(handlers::proposals::revoke_share),
        )
        .route(
            "/proposals/:id/export/:format",
            get(handlers::proposals::export),
        )
        .route(
            "/proposals/:id/duplicate",
            post(handlers::proposals::duplicate),
        )
        .route("/proposals/:id/generate", post(handlers::proposals::generate))
        .route(
            "/proposals/:id/project-status",
            get(handlers::proposals::project_status),
        )
        .route(
            "/proposals/:id/advance-phase",
            post(handlers::proposals::advance_phase),
        )
        .route(
            "/proposals/:id/update-milestone",
            post(handlers::proposals::update_milestone),
        )
        .route(
            "/proposals/:id/files",
            get(handlers::proposals::proposal_files),
        )
        // Dashboards
        .route("/dashboard/summary", get(handlers::dashboard::summary))
        .route(
            "/team-dashboard/overview",
            get(handlers::team_dashboard::overview),
        )
        .route(
            "/team-dashboard/proposals",
            get(handlers::team_dashboard::proposals),
        )
        .route(
            "/team-dashboard/analytics",
            get(handlers::team_dashboard::analytics),
        )
        .route(
            "/team-dashboard/assign-proposal",
            post(handlers::team_dashboard::assign_proposal),
        )
        .route(
            "/team-dashboard/bulk-update",
            post(handlers::team_dashboard::bulk_update),
        )
        .route(
            "/team-dashboard/dashboard-data",
            get(handlers::team_dashboard::dashboard_data),
        )
        // Client portal
        .route(
            "/client-portal/proposals",
            get(handlers::client_portal::proposals),
        )
        .route(
            "/client-portal/proposals/:id/project-status",
            get(handlers::client_portal::project_status),
        )
        .route(
            "/client-portal/proposals/:id/export/:format",
            get(handlers::client_portal::export),
        )
        .route(
            "/client-portal/dashboard",
            get(handlers::client_portal::dashboard),
        )
        // Files
        .route(
            "/files/upload",
            post(handlers::files::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files", get(handlers::files::search))
        .route(
            "/files/:id",
            get(handlers::files::get_file).delete(handlers::files::delete_file),
        )
        .route("/files/:id/download", get(handlers::files::download))
        .route("/files/:id/attach", post(handlers::files::attach))
        .layer(axum_mw::from_fn(jwt_auth))
        .layer(Extension(jwt_config));

    // Public routes (no auth)
    let public = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/shared/:token", get(handlers::shared::shared_proposal));

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", public.merge(protected))
        .layer(Extension(portal))
        .layer(Extension(PublicLinks::new(&options.public_base_url)))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&options.cors_origins)),
        )
}
