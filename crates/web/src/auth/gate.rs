//! Access gate
//!
//! Per-connection authorization: resolve who is calling, then ask the policy.
//! The policy snapshot is built once by [`AccessGate::init`] before the
//! server accepts connections and is only read afterwards, so requests share
//! it through an `Arc` without locking.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::ConfigStore;
use super::resolver::IdentityResolver;
use super::types::{Decision, Mode, PolicyConfig, ResolvedIdentity};

/// Authorization façade shared by all request handlers
#[derive(Clone)]
pub struct AccessGate {
    config: Arc<PolicyConfig>,
    resolver: IdentityResolver,
    config_path: Option<PathBuf>,
    loaded: bool,
}

impl AccessGate {
    /// Gate over an already built policy
    pub fn new(config: PolicyConfig, resolver: IdentityResolver) -> Self {
        Self {
            config: Arc::new(config),
            resolver,
            config_path: None,
            loaded: true,
        }
    }

    /// Load (or create) the policy from `store`.
    ///
    /// Never fails: a policy that cannot be loaded or created is replaced by
    /// the fail-open policy (`EVERYONE`, no owner) and `false` is returned.
    pub async fn init(store: &ConfigStore, resolver: IdentityResolver) -> (Self, bool) {
        let (config, ok) = match store.load_or_create(&resolver).await {
            Ok(config) => (config, true),
            Err(e) => {
                warn!(
                    "Access policy at {} unusable ({}); falling back to EVERYONE",
                    store.path().display(),
                    e
                );
                (PolicyConfig::fail_open(), false)
            }
        };

        info!(
            "Access mode {} (owner: {})",
            config.mode,
            config
                .personal_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unset".to_string())
        );

        let gate = Self {
            config: Arc::new(config),
            resolver,
            config_path: Some(store.path().to_path_buf()),
            loaded: ok,
        };
        (gate, ok)
    }

    /// [`AccessGate::init`] with the store located through the environment
    pub async fn init_from_env(resolver: IdentityResolver) -> (Self, bool) {
        match ConfigStore::from_env() {
            Ok(store) => Self::init(&store, resolver).await,
            Err(e) => {
                warn!("Cannot locate access policy ({}); falling back to EVERYONE", e);
                let mut gate = Self::new(PolicyConfig::fail_open(), resolver);
                gate.loaded = false;
                (gate, false)
            }
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Mode name for diagnostics (raw value for unknown modes)
    pub fn mode_string(&self) -> &str {
        self.config.mode.as_str()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Whether the policy came from disk rather than the fail-open fallback
    pub fn is_config_loaded(&self) -> bool {
        self.loaded
    }

    /// Who is calling from `peer`.
    ///
    /// Loopback peers are the instance owner and are never sent to the
    /// identity service.
    pub async fn identify(&self, peer: Option<SocketAddr>) -> ResolvedIdentity {
        match peer_ip(peer) {
            Some(ip) if ip.is_loopback() => ResolvedIdentity::loopback(self.config.personal_id),
            Some(ip) => self.resolver.identity_for_address(ip).await,
            None => ResolvedIdentity::UNRESOLVED,
        }
    }

    /// Decide whether `peer` may use privileged endpoints
    pub async fn authorize(&self, peer: Option<SocketAddr>) -> Decision {
        if self.config.mode == Mode::Everyone {
            // Resolution here only feeds the log line.
            let identity = self.identify(peer).await;
            debug!(
                peer = ?peer,
                user_id = ?identity.user_id,
                source = ?identity.source,
                "allowed (EVERYONE)"
            );
            return Decision::allow(identity);
        }

        if peer_ip(peer).is_none() {
            info!(peer = ?peer, mode = %self.config.mode, "denied: peer address unavailable");
            return Decision::deny(ResolvedIdentity::UNRESOLVED);
        }

        let identity = self.identify(peer).await;
        if !identity.is_resolved() {
            info!(peer = ?peer, mode = %self.config.mode, source = ?identity.source, "denied: caller identity unresolved");
            return Decision::deny(identity);
        }

        let allowed = self.config.permits(identity.user_id);
        if allowed {
            debug!(peer = ?peer, mode = %self.config.mode, user_id = ?identity.user_id, source = ?identity.source, "allowed");
            Decision::allow(identity)
        } else {
            info!(peer = ?peer, mode = %self.config.mode, user_id = ?identity.user_id, source = ?identity.source, "denied by policy");
            Decision::deny(identity)
        }
    }
}

/// Usable caller address; IPv4-mapped IPv6 is unwrapped to IPv4
fn peer_ip(peer: Option<SocketAddr>) -> Option<IpAddr> {
    let ip = peer?.ip().to_canonical();
    (!ip.is_unspecified()).then_some(ip)
}
