//! Mode-based policy engine.
//!
//! Pure decision logic: no I/O, no identity resolution. The access gate
//! resolves the caller first and hands the result here.

use std::collections::BTreeSet;

use super::types::{Mode, PolicyConfig, UserId};

/// Decide whether `caller` may use privileged endpoints under `mode`.
///
/// Rules:
/// - `EVERYONE` allows every caller, resolved or not.
/// - `OFF` denies every caller.
/// - `PERSONAL` allows only the instance owner, and only when the owner is known.
/// - `CONTACTS_ONLY` allows the instance owner and members of `contacts`.
/// - Any unknown mode denies.
pub fn decide(
    mode: &Mode,
    caller: Option<UserId>,
    personal_id: Option<UserId>,
    contacts: &BTreeSet<UserId>,
) -> bool {
    match mode {
        Mode::Everyone => true,
        Mode::Off => false,
        Mode::Personal => matches!((caller, personal_id), (Some(c), Some(p)) if c == p),
        Mode::ContactsOnly => match caller {
            None => false,
            Some(c) => personal_id == Some(c) || contacts.contains(&c),
        },
        Mode::Unknown(_) => false,
    }
}

impl PolicyConfig {
    /// Evaluate this policy for a resolved caller
    pub fn permits(&self, caller: Option<UserId>) -> bool {
        decide(&self.mode, caller, self.personal_id, &self.contacts)
    }
}
