//! Mesh identity resolution
//!
//! The HTTP layer only sees a bare peer address. The owning user is learned
//! out-of-band by asking the mesh VPN ("who owns this address?"):
//! - structured `whois` lookup first
//! - full status dump as fallback
//!
//! The service sits behind the [`MeshIdentityService`] trait so tests can use
//! [`StaticIdentityService`] instead of spawning the Tailscale CLI.

use async_trait::async_trait;
use serde::Deserialize;
use spacedrop_common::{Error, Result};
use std::collections::HashMap;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::types::{IdentitySource, ResolvedIdentity, UserId};

pub const ENV_TAILSCALE_BIN: &str = "SPACEDROP_TAILSCALE_BIN";
pub const ENV_RESOLVE_TIMEOUT_MS: &str = "SPACEDROP_RESOLVE_TIMEOUT_MS";

const DEFAULT_BINARY: &str = "tailscale";
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

// ============================================================================
// Service interface
// ============================================================================

/// Out-of-band identity service of the mesh VPN
#[async_trait]
pub trait MeshIdentityService: Send + Sync {
    /// This host's own primary mesh address
    async fn self_address(&self) -> Result<Option<IpAddr>>;

    /// Structured ownership lookup for `addr`
    async fn whois(&self, addr: IpAddr) -> Result<Option<UserId>>;

    /// Search the full network status for the node owning `addr`
    async fn status_lookup(&self, addr: IpAddr) -> Result<Option<UserId>>;
}

// ============================================================================
// Tailscale CLI implementation
// ============================================================================

/// Identity service settings
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Tailscale CLI binary (name on `PATH` or absolute path)
    pub binary: String,
    /// Upper bound for a single CLI invocation
    pub timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ResolverSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(binary) = std::env::var(ENV_TAILSCALE_BIN)
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            settings.binary = binary.trim().to_string();
        }

        if let Ok(raw) = std::env::var(ENV_RESOLVE_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => settings.timeout = Duration::from_millis(ms),
                _ => warn!(
                    "ignoring invalid {}={:?}, using {}ms",
                    ENV_RESOLVE_TIMEOUT_MS,
                    raw,
                    settings.timeout.as_millis()
                ),
            }
        }

        settings
    }
}

/// Talks to the local `tailscale` CLI.
///
/// Every call spawns one process, bounded by the configured timeout. The
/// child is killed when the call is dropped, so an aborted request does not
/// leave a stray process behind.
pub struct TailscaleCli {
    settings: ResolverSettings,
}

impl TailscaleCli {
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let command_line = format!("{} {}", self.settings.binary, args.join(" "));
        debug!("running {}", command_line);

        let child = Command::new(&self.settings.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.settings.timeout, child)
            .await
            .map_err(|_| Error::Timeout {
                millis: self.settings.timeout.as_millis() as u64,
            })?
            .map_err(|e| Error::command(&command_line, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::command(
                &command_line,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MeshIdentityService for TailscaleCli {
    async fn self_address(&self) -> Result<Option<IpAddr>> {
        let out = self.run(&["ip", "-4"]).await?;
        Ok(parse_self_address(&out))
    }

    async fn whois(&self, addr: IpAddr) -> Result<Option<UserId>> {
        let out = self.run(&["whois", "--json", &addr.to_string()]).await?;
        parse_whois(&out)
    }

    async fn status_lookup(&self, addr: IpAddr) -> Result<Option<UserId>> {
        let out = self.run(&["status", "--json"]).await?;
        parse_status(&out, addr)
    }
}

// ============================================================================
// Output parsing
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct WhoisResponse {
    #[serde(rename = "UserProfile", default)]
    user_profile: Option<WhoisProfile>,
    #[serde(rename = "Node", default)]
    node: Option<WhoisNode>,
    #[serde(rename = "User", default)]
    user: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WhoisProfile {
    #[serde(rename = "ID", default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WhoisNode {
    #[serde(rename = "User", default)]
    user: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusResponse {
    #[serde(rename = "Self", default)]
    self_node: Option<StatusNode>,
    #[serde(rename = "Peer", default)]
    peers: Option<HashMap<String, StatusNode>>,
}

#[derive(Debug, Deserialize)]
struct StatusNode {
    #[serde(rename = "TailscaleIPs", default)]
    addresses: Option<Vec<String>>,
    #[serde(rename = "UserID", default)]
    user_id: Option<i64>,
}

impl StatusNode {
    fn owns(&self, addr: IpAddr) -> bool {
        let wanted = addr.to_string();
        self.addresses.iter().flatten().any(|a| {
            let a = a.trim();
            a == wanted || a.parse::<IpAddr>().map(|ip| ip == addr).unwrap_or(false)
        })
    }
}

/// First address printed by `tailscale ip`
pub(crate) fn parse_self_address(out: &str) -> Option<IpAddr> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find_map(|l| l.parse().ok())
}

/// Owner from `tailscale whois --json`: `UserProfile.ID`, else `Node.User`,
/// else a top-level `User`
pub(crate) fn parse_whois(json: &str) -> Result<Option<UserId>> {
    let resp: WhoisResponse = serde_json::from_str(json)?;
    let id = resp
        .user_profile
        .and_then(|p| p.id)
        .and_then(UserId::new)
        .or_else(|| resp.node.and_then(|n| n.user).and_then(UserId::new))
        .or_else(|| resp.user.and_then(UserId::new));
    Ok(id)
}

/// Owner of the node listing `addr` in `tailscale status --json`
pub(crate) fn parse_status(json: &str, addr: IpAddr) -> Result<Option<UserId>> {
    let resp: StatusResponse = serde_json::from_str(json)?;
    let id = resp
        .peers
        .iter()
        .flat_map(|peers| peers.values())
        .chain(resp.self_node.iter())
        .find(|node| node.owns(addr))
        .and_then(|node| node.user_id)
        .and_then(UserId::new);
    Ok(id)
}

// ============================================================================
// Resolver
// ============================================================================

/// Maps peer addresses to mesh identities.
///
/// Failures never surface to the caller: a service that is missing, slow, or
/// returns garbage just leaves the identity unresolved, which the policy
/// treats as deny.
#[derive(Clone)]
pub struct IdentityResolver {
    service: Arc<dyn MeshIdentityService>,
}

impl IdentityResolver {
    pub fn new(service: Arc<dyn MeshIdentityService>) -> Self {
        Self { service }
    }

    /// Resolver backed by the Tailscale CLI
    pub fn tailscale(settings: ResolverSettings) -> Self {
        Self::new(Arc::new(TailscaleCli::new(settings)))
    }

    /// Identity owning `addr`. Each lookup is attempted once, no retries.
    pub async fn identity_for_address(&self, addr: IpAddr) -> ResolvedIdentity {
        match self.service.whois(addr).await {
            Ok(Some(id)) => return ResolvedIdentity::resolved(id, IdentitySource::Whois),
            Ok(None) => debug!("whois for {} returned no user", addr),
            Err(e) => debug!("whois for {} failed: {}", addr, e),
        }

        match self.service.status_lookup(addr).await {
            Ok(Some(id)) => return ResolvedIdentity::resolved(id, IdentitySource::Status),
            Ok(None) => debug!("no node in status owns {}", addr),
            Err(e) => debug!("status lookup for {} failed: {}", addr, e),
        }

        ResolvedIdentity::UNRESOLVED
    }

    /// Identity of this host's owner
    pub async fn self_identity(&self) -> Option<UserId> {
        let addr = match self.service.self_address().await {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                debug!("identity service reported no self address");
                return None;
            }
            Err(e) => {
                debug!("self address lookup failed: {}", e);
                return None;
            }
        };
        self.identity_for_address(addr).await.user_id
    }
}

// ============================================================================
// Static implementation
// ============================================================================

/// In-memory identity service with fixed answers.
///
/// Counts every call so callers can check whether resolution happened.
#[derive(Debug, Default)]
pub struct StaticIdentityService {
    self_address: Option<IpAddr>,
    whois: HashMap<IpAddr, UserId>,
    status: HashMap<IpAddr, UserId>,
    failing: bool,
    calls: AtomicUsize,
}

impl StaticIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_self_address(mut self, addr: IpAddr) -> Self {
        self.self_address = Some(addr);
        self
    }

    /// Answer `addr` through the `whois` path
    pub fn with_whois(mut self, addr: IpAddr, user: i64) -> Self {
        if let Some(id) = UserId::new(user) {
            self.whois.insert(addr, id);
        }
        self
    }

    /// Answer `addr` through the status fallback only
    pub fn with_status(mut self, addr: IpAddr, user: i64) -> Self {
        if let Some(id) = UserId::new(user) {
            self.status.insert(addr, id);
        }
        self
    }

    /// Make every call fail as if the CLI were unavailable
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Number of service calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::command(op, "identity service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl MeshIdentityService for StaticIdentityService {
    async fn self_address(&self) -> Result<Option<IpAddr>> {
        self.record("ip")?;
        Ok(self.self_address)
    }

    async fn whois(&self, addr: IpAddr) -> Result<Option<UserId>> {
        self.record("whois")?;
        Ok(self.whois.get(&addr).copied())
    }

    async fn status_lookup(&self, addr: IpAddr) -> Result<Option<UserId>> {
        self.record("status")?;
        Ok(self.status.get(&addr).copied())
    }
}
