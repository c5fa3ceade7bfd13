//! Spacedrop web service
//!
//! Lets devices on a personal mesh VPN drop content onto this host. This
//! crate holds the mesh-identity access control and its Axum integration.

pub mod auth;
pub mod server;

pub use auth::{AccessGate, ConfigStore, Decision, IdentityResolver, Mode, PolicyConfig, UserId};
pub use server::{router, serve};
