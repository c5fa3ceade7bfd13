//! Mesh-identity access control.
//!
//! Decides, per inbound connection, whether the caller may use privileged
//! endpoints:
//! - `config`: loads or creates the persisted policy
//! - `resolver`: maps a peer address to a mesh user identity
//! - `policy`: pure mode-based decision
//! - `gate`: per-connection façade combining the above
//! - `middleware`: Axum integration returning 403 on deny

pub mod config;
pub mod gate;
pub mod middleware;
pub mod policy;
pub mod resolver;
pub mod types;

pub use config::ConfigStore;
pub use gate::AccessGate;
pub use middleware::{forbidden, require_access, FORBIDDEN_DETAIL};
pub use policy::decide;
pub use resolver::{
    IdentityResolver, MeshIdentityService, ResolverSettings, StaticIdentityService, TailscaleCli,
};
pub use types::*;
