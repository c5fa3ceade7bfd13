//! Policy configuration store
//!
//! The policy lives in a small JSON document:
//!
//! ```json
//! { "mode": "EVERYONE", "personal_user_id": 42, "contacts_user_ids": [7, 9] }
//! ```
//!
//! Missing fields default (`EVERYONE`, no owner, no contacts) and unknown
//! fields are ignored. A document with the wrong shape is rejected.

use serde::{Deserialize, Serialize};
use spacedrop_common::paths::{self, CONFIG_FILE_NAME};
use spacedrop_common::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::resolver::IdentityResolver;
use super::types::{Mode, PolicyConfig, UserId};

/// Full path of the policy file
pub const ENV_CONFIG_FILE: &str = "SPACEDROP_CONFIG_FILE";
/// Full path of the policy file (secondary name)
pub const ENV_CONF_PATH: &str = "SPACEDROP_CONF_PATH";
/// Directory holding `config.json`
pub const ENV_CONF_DIR: &str = "SPACEDROP_CONF_DIR";
/// Comma-separated list of modes this instance accepts
pub const ENV_VALID_MODES: &str = "SPACEDROP_VALID_MODES";

/// On-disk document
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    personal_user_id: Option<LenientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contacts_user_ids: Option<Vec<LenientId>>,
}

/// Identity written as a number or a numeric string.
///
/// Anything else lands in `Other`: whole-valued floats still count, every
/// other value reads as no identity and the rest of the document loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LenientId {
    Number(i64),
    Text(String),
    Other(serde_json::Value),
}

impl LenientId {
    fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Number(n) => UserId::new(*n),
            Self::Text(s) => s.trim().parse().ok().and_then(UserId::new),
            Self::Other(value) => value.as_f64().and_then(integral).and_then(UserId::new),
        }
    }
}

/// Whole-valued float within `i64` range, e.g. `42.0`
fn integral(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

impl From<&PolicyConfig> for ConfigDocument {
    fn from(cfg: &PolicyConfig) -> Self {
        Self {
            mode: Some(cfg.mode.as_str().to_string()),
            personal_user_id: Some(LenientId::Number(cfg.personal_id.map(UserId::get).unwrap_or(0))),
            contacts_user_ids: Some(
                cfg.contacts
                    .iter()
                    .map(|c| LenientId::Number(c.get()))
                    .collect(),
            ),
        }
    }
}

/// Loads, and on first run creates, the policy file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    valid_modes: Option<BTreeSet<String>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            valid_modes: None,
        }
    }

    /// Restrict accepted modes; anything else loads as an unknown (deny-all) mode
    pub fn with_valid_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let modes: BTreeSet<String> = modes
            .into_iter()
            .map(|m| m.as_ref().trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        self.valid_modes = if modes.is_empty() { None } else { Some(modes) };
        self
    }

    /// Store at the path selected by the process environment
    pub fn from_env() -> Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let store = Self::new(Self::resolve_path(lookup)?);
        Ok(match lookup(ENV_VALID_MODES) {
            Some(raw) => store.with_valid_modes(raw.split(',')),
            None => store,
        })
    }

    /// Pick the policy file path, first match wins:
    /// 1. `SPACEDROP_CONFIG_FILE`
    /// 2. `SPACEDROP_CONF_PATH`
    /// 3. `SPACEDROP_CONF_DIR` + `config.json`
    /// 4. `~/.config/spacedrop/config.json`
    pub fn resolve_path<F>(lookup: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(file) = get(ENV_CONFIG_FILE).or_else(|| get(ENV_CONF_PATH)) {
            return paths::expand_home(file.trim());
        }
        if let Some(dir) = get(ENV_CONF_DIR) {
            return Ok(paths::expand_home(dir.trim())?.join(CONFIG_FILE_NAME));
        }
        paths::default_config_path()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the existing policy file
    pub fn load(&self) -> Result<PolicyConfig> {
        let content = std::fs::read_to_string(&self.path)?;
        self.parse(&content)
    }

    fn parse(&self, content: &str) -> Result<PolicyConfig> {
        let doc: ConfigDocument = serde_json::from_str(content)?;

        let mode = match doc.mode.as_deref() {
            None => Mode::Everyone,
            Some(raw) => self.restrict(Mode::parse(raw), raw),
        };
        let personal_id = doc.personal_user_id.as_ref().and_then(LenientId::user_id);
        let contacts = doc
            .contacts_user_ids
            .unwrap_or_default()
            .iter()
            .filter_map(LenientId::user_id)
            .collect();

        Ok(PolicyConfig {
            mode,
            personal_id,
            contacts,
        })
    }

    fn restrict(&self, mode: Mode, raw: &str) -> Mode {
        match &self.valid_modes {
            Some(valid) if !valid.contains(mode.as_str()) => {
                debug!("mode {:?} is not in the accepted mode list", raw);
                Mode::Unknown(raw.to_string())
            }
            _ => mode,
        }
    }

    /// Load the policy, creating it on first run.
    ///
    /// A fresh policy is `EVERYONE` with the owner discovered through
    /// `resolver` and no contacts. It is re-read after writing to confirm it
    /// was persisted.
    pub async fn load_or_create(&self, resolver: &IdentityResolver) -> Result<PolicyConfig> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let cfg = self.parse(&content)?;
                info!("Loaded access policy from {}", self.path.display());
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let personal_id = resolver.self_identity().await;
                match personal_id {
                    Some(id) => info!("Discovered owner identity {}", id),
                    None => info!("Owner identity could not be discovered; leaving it unset"),
                }
                self.create(&PolicyConfig::first_run(personal_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, cfg: &PolicyConfig) -> Result<PolicyConfig> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)?;
        }

        let mut content = serde_json::to_string_pretty(&ConfigDocument::from(cfg))?;
        content.push('\n');
        std::fs::write(&self.path, content)?;
        info!("Created access policy at {}", self.path.display());

        self.load()
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::resolver::StaticIdentityService;
    use spacedrop_common::Error;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn uid(raw: i64) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn resolver_for(user: i64) -> (Arc<StaticIdentityService>, IdentityResolver) {
        let addr = "100.64.0.1".parse().unwrap();
        let svc = Arc::new(
            StaticIdentityService::new()
                .with_self_address(addr)
                .with_whois(addr, user),
        );
        (svc.clone(), IdentityResolver::new(svc))
    }

    fn write(dir: &TempDir, content: &str) -> ConfigStore {
        let path = dir.path().join("config.json");
        std::fs::write(&path, content).unwrap();
        ConfigStore::new(path)
    }

    #[tokio::test]
    async fn test_first_run_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nested/spacedrop/config.json"));
        let (_, resolver) = resolver_for(42);

        let cfg = store.load_or_create(&resolver).await.unwrap();
        assert_eq!(cfg.mode, Mode::Everyone);
        assert_eq!(cfg.personal_id, Some(uid(42)));
        assert!(cfg.contacts.is_empty());

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, cfg);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({ "mode": "EVERYONE", "personal_user_id": 42, "contacts_user_ids": [] })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_created_directory_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("spacedrop/config.json"));
        let (_, resolver) = resolver_for(42);
        store.load_or_create(&resolver).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("spacedrop")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_first_run_without_identity_service() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        let resolver = IdentityResolver::new(Arc::new(StaticIdentityService::new().failing()));

        let cfg = store.load_or_create(&resolver).await.unwrap();
        assert_eq!(cfg, PolicyConfig::first_run(None));
    }

    #[tokio::test]
    async fn test_existing_file_skips_discovery() {
        let dir = TempDir::new().unwrap();
        let store = write(&dir, r#"{"mode":"PERSONAL","personal_user_id":42,"contacts_user_ids":[]}"#);
        let (svc, resolver) = resolver_for(99);

        let cfg = store.load_or_create(&resolver).await.unwrap();
        assert_eq!(cfg.mode, Mode::Personal);
        assert_eq!(cfg.personal_id, Some(uid(42)));
        assert_eq!(svc.calls(), 0);
    }

    #[test]
    fn test_missing_fields_default() {
        let dir = TempDir::new().unwrap();
        let cfg = write(&dir, "{}").load().unwrap();
        assert_eq!(cfg, PolicyConfig::fail_open());

        let cfg = write(&dir, r#"{ "mode": "contacts_only", "extra": {"mode": "OFF"} }"#)
            .load()
            .unwrap();
        assert_eq!(cfg.mode, Mode::ContactsOnly);
        assert_eq!(cfg.personal_id, None);
    }

    #[test]
    fn test_lenient_identities() {
        let dir = TempDir::new().unwrap();
        let cfg = write(
            &dir,
            r#"{
                "mode": "CONTACTS_ONLY",
                "personal_user_id": "42",
                "contacts_user_ids": [9, "7", 0, "junk", 9]
            }"#,
        )
        .load()
        .unwrap();
        assert_eq!(cfg.personal_id, Some(uid(42)));
        assert_eq!(cfg.contacts.iter().map(|c| c.get()).collect::<Vec<_>>(), vec![7, 9]);
    }

    #[test]
    fn test_bad_identity_entries_dropped() {
        let dir = TempDir::new().unwrap();
        let cfg = write(&dir, r#"{"mode":"OFF","contacts_user_ids":[7,null]}"#).load().unwrap();
        assert_eq!(cfg.mode, Mode::Off);
        assert_eq!(cfg.contacts, BTreeSet::from([uid(7)]));

        let cfg = write(
            &dir,
            r#"{
                "mode": "PERSONAL",
                "personal_user_id": 42.0,
                "contacts_user_ids": [true, 1.5, 18446744073709551615, {"id": 3}, [4], 8.0]
            }"#,
        )
        .load()
        .unwrap();
        assert_eq!(cfg.mode, Mode::Personal);
        assert_eq!(cfg.personal_id, Some(uid(42)));
        assert_eq!(cfg.contacts, BTreeSet::from([uid(8)]));

        let cfg = write(&dir, r#"{"mode":"OFF","personal_user_id":false}"#).load().unwrap();
        assert_eq!(cfg.mode, Mode::Off);
        assert_eq!(cfg.personal_id, None);
    }

    #[test]
    fn test_create_fails_when_path_is_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::create_dir(&path).unwrap();

        let store = ConfigStore::new(path);
        let result = store.create(&PolicyConfig::first_run(UserId::new(42)));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_create_fails_when_readback_is_empty() {
        // Writes succeed but nothing comes back
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::os::unix::fs::symlink("/dev/null", &path).unwrap();

        let store = ConfigStore::new(path);
        let result = store.create(&PolicyConfig::first_run(UserId::new(42)));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_null_contacts() {
        let dir = TempDir::new().unwrap();
        let cfg = write(&dir, r#"{"mode":"OFF","contacts_user_ids":null}"#).load().unwrap();
        assert_eq!(cfg.mode, Mode::Off);
        assert!(cfg.contacts.is_empty());
    }

    #[test]
    fn test_structurally_invalid_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(write(&dir, "[1, 2]").load(), Err(Error::Serialization(_))));
        assert!(matches!(write(&dir, r#"{"mode": 5}"#).load(), Err(Error::Serialization(_))));
        assert!(matches!(write(&dir, "mode=EVERYONE").load(), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_valid_modes_restriction() {
        let dir = TempDir::new().unwrap();
        let store = write(&dir, r#"{"mode":"personal","personal_user_id":42}"#)
            .with_valid_modes("EVERYONE, off".split(','));
        assert_eq!(store.load().unwrap().mode, Mode::Unknown("personal".to_string()));

        let store = store.with_valid_modes(["personal"]);
        assert_eq!(store.load().unwrap().mode, Mode::Personal);
    }

    fn env_lookup(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let env: HashMap<&'static str, &'static str> = pairs.iter().copied().collect();
        move |k: &str| env.get(k).map(|v| v.to_string())
    }

    #[test]
    fn test_path_precedence() {
        let all = [
            (ENV_CONFIG_FILE, "/a/file.json"),
            (ENV_CONF_PATH, "/b/file.json"),
            (ENV_CONF_DIR, "/c"),
        ];
        assert_eq!(
            ConfigStore::resolve_path(env_lookup(&all)).unwrap(),
            PathBuf::from("/a/file.json")
        );
        assert_eq!(
            ConfigStore::resolve_path(env_lookup(&all[1..])).unwrap(),
            PathBuf::from("/b/file.json")
        );
        assert_eq!(
            ConfigStore::resolve_path(env_lookup(&[(ENV_CONF_PATH, "  "), (ENV_CONF_DIR, "/c")])).unwrap(),
            PathBuf::from("/c/config.json")
        );
    }
}
