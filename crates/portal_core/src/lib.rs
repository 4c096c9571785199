//! Project portal core: domain types, port traits, the proposal status
//! machine, access policy and the [`service::Portal`] application service.
//!
//! Nothing here depends on sqlx or axum. `portal_postgres` implements the
//! ports; `portal_server` exposes the service over HTTP.

pub mod access;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod memory;
pub mod password;
pub mod ports;
pub mod principal;
pub mod seeds;
pub mod service;
pub mod tokens;
pub mod types;
pub mod upload;

pub use error::PortalError;
pub use principal::Principal;
pub use service::{Portal, PortalSettings, PortalStores};
