//! Postgres adapter for the project portal.
//!
//! [`PgStores`] bundles one newtype-over-`PgPool` store per port trait;
//! [`database`] owns pool construction and the embedded migrations.

pub mod database;
pub mod sqlx_types;
pub mod store;

use std::sync::Arc;

use portal_core::ports::BlobStore;
use portal_core::service::PortalStores;
use sqlx::PgPool;

pub use database::{connect, mask_database_url, run_migrations, DatabaseConfig};
pub use store::{
    PgAuditStore, PgFileStore, PgProposalStore, PgRefreshTokenStore, PgShareStore, PgUserStore,
};

pub struct PgStores {
    pub users: PgUserStore,
    pub tokens: PgRefreshTokenStore,
    pub proposals: PgProposalStore,
    pub shares: PgShareStore,
    pub files: PgFileStore,
    pub audit: PgAuditStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: PgUserStore::new(pool.clone()),
            tokens: PgRefreshTokenStore::new(pool.clone()),
            proposals: PgProposalStore::new(pool.clone()),
            shares: PgShareStore::new(pool.clone()),
            files: PgFileStore::new(pool.clone()),
            audit: PgAuditStore::new(pool),
        }
    }

    /// Wire every port for the service. Blob content lives outside the
    /// database, so the caller supplies that port.
    pub fn into_portal_stores(self, blobs: Arc<dyn BlobStore>) -> PortalStores {
        PortalStores {
            users: Arc::new(self.users),
            tokens: Arc::new(self.tokens),
            proposals: Arc::new(self.proposals),
            shares: Arc::new(self.shares),
            files: Arc::new(self.files),
            audit: Arc::new(self.audit),
            blobs,
        }
    }
}
