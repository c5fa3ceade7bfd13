//! Core types for the access-control system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable identity assigned to a user account by the mesh identity service.
///
/// Zero is the identity service's "no value" and is never a valid identity,
/// so `UserId::new(0)` yields `None`. "Unresolved" is therefore always
/// `Option::None`, never a magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn new(raw: i64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authorization mode governing who may use privileged endpoints
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Mode {
    /// Anyone who can reach the service
    #[default]
    Everyone,
    /// Nobody
    Off,
    /// Only the instance owner
    Personal,
    /// The instance owner and listed contacts
    ContactsOnly,
    /// Any other value; denies every caller
    Unknown(String),
}

impl Mode {
    /// Parse a mode name, case-insensitively
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EVERYONE" => Self::Everyone,
            "OFF" => Self::Off,
            "PERSONAL" => Self::Personal,
            "CONTACTS_ONLY" => Self::ContactsOnly,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    /// Canonical name, or the raw loaded value for an unknown mode
    pub fn as_str(&self) -> &str {
        match self {
            Self::Everyone => "EVERYONE",
            Self::Off => "OFF",
            Self::Personal => "PERSONAL",
            Self::ContactsOnly => "CONTACTS_ONLY",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization policy snapshot.
///
/// Loaded once at startup and never mutated afterwards; request handlers
/// share it read-only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyConfig {
    pub mode: Mode,
    /// Identity of the instance owner, if known
    pub personal_id: Option<UserId>,
    pub contacts: BTreeSet<UserId>,
}

impl PolicyConfig {
    /// Policy used when the configuration cannot be loaded or created.
    ///
    /// Configuration errors degrade to `EVERYONE` with no owner instead of
    /// refusing to start. This is a product decision for a local drop tool:
    /// a broken file must not make the service unusable.
    pub fn fail_open() -> Self {
        Self::default()
    }

    /// Policy written on first run
    pub fn first_run(personal_id: Option<UserId>) -> Self {
        Self {
            mode: Mode::Everyone,
            personal_id,
            contacts: BTreeSet::new(),
        }
    }
}

/// How a caller's identity was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// No identity could be determined
    Unresolved,
    /// Structured ownership lookup (`whois`)
    Whois,
    /// Full network status dump
    Status,
    /// Loopback peer, trusted as the instance owner
    Loopback,
}

/// Identity of a caller plus its provenance, produced fresh per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub user_id: Option<UserId>,
    pub source: IdentitySource,
}

impl ResolvedIdentity {
    pub const UNRESOLVED: Self = Self {
        user_id: None,
        source: IdentitySource::Unresolved,
    };

    pub fn resolved(user_id: UserId, source: IdentitySource) -> Self {
        Self {
            user_id: Some(user_id),
            source,
        }
    }

    pub fn loopback(personal_id: Option<UserId>) -> Self {
        Self {
            user_id: personal_id,
            source: IdentitySource::Loopback,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub identity: ResolvedIdentity,
}

impl Decision {
    pub fn allow(identity: ResolvedIdentity) -> Self {
        Self {
            allowed: true,
            identity,
        }
    }

    pub fn deny(identity: ResolvedIdentity) -> Self {
        Self {
            allowed: false,
            identity,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.identity.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_rejects_zero() {
        assert_eq!(UserId::new(0), None);
        assert_eq!(UserId::new(42).map(UserId::get), Some(42));
    }

    #[test]
    fn test_mode_parse_case_insensitive() {
        assert_eq!(Mode::parse("everyone"), Mode::Everyone);
        assert_eq!(Mode::parse("Contacts_Only"), Mode::ContactsOnly);
        assert_eq!(Mode::parse(" personal "), Mode::Personal);
        assert_eq!(Mode::parse("off"), Mode::Off);
    }

    #[test]
    fn test_unknown_mode_keeps_raw_value() {
        let mode = Mode::parse("BOGUS");
        assert_eq!(mode, Mode::Unknown("BOGUS".to_string()));
        assert_eq!(mode.as_str(), "BOGUS");
    }

    #[test]
    fn test_fail_open_policy() {
        let cfg = PolicyConfig::fail_open();
        assert_eq!(cfg.mode, Mode::Everyone);
        assert_eq!(cfg.personal_id, None);
        assert!(cfg.contacts.is_empty());
    }

    #[test]
    fn test_decision_serializes_provenance() {
        let decision = Decision::allow(ResolvedIdentity::resolved(
            UserId::new(7).unwrap(),
            IdentitySource::Whois,
        ));
        let json = serde_json::to_value(decision).unwrap();
        assert_eq!(json["allowed"], true);
        assert_eq!(json["identity"]["user_id"], 7);
        assert_eq!(json["identity"]["source"], "whois");
    }
}
