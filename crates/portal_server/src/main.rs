//! portal_server: REST server for the project portal.
//!
//! Configuration comes from the environment (see [`ServerConfig`]); without
//! `DATABASE_URL` the server runs against the in-memory store.

use std::sync::Arc;

use chrono::Duration;
use portal_core::memory::MemoryStore;
use portal_core::ports::BlobStore;
use portal_core::seeds::seed_demo_users;
use portal_core::service::PortalStores;
use portal_core::Portal;
use portal_postgres::{connect, mask_database_url, run_migrations, DatabaseConfig, PgStores};
use portal_server::config::ServerConfig;
use portal_server::middleware::jwt::JwtConfig;
use portal_server::router::{build_router, HttpOptions};
use portal_server::storage::LocalBlobStore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,portal_server=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(environment = %config.environment, "starting portal_server");

    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.upload_dir));
    let stores = match &config.database_url {
        Some(url) => {
            tracing::info!(database = %mask_database_url(url), "connecting to database");
            let pool = connect(&DatabaseConfig::new(url.clone(), config.database_pool_size)).await?;
            run_migrations(&pool).await?;
            PgStores::new(pool).into_portal_stores(blobs)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            PortalStores::in_memory(MemoryStore::new()).with_blobs(blobs)
        }
    };

    let jwt_config = JwtConfig::new(
        config.jwt_secret.as_bytes(),
        Duration::minutes(config.access_token_minutes),
    );
    let portal = Arc::new(Portal::new(
        stores,
        config.portal_settings(),
        Arc::new(jwt_config.clone()),
    )?);

    if config.seed_demo_users {
        seed_demo_users(portal.stores().users.as_ref(), config.bcrypt_cost).await?;
    }

    let app = build_router(portal, jwt_config, &HttpOptions::from_config(&config));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("portal_server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
