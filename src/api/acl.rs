//! Capability tokens and access control
//!
//! A token is an opaque string from the alphabet `[0-9A-Za-z-]`, stored as
//! the record `remixdb.tokens.<token>` whose value is an [`AccessControl`].
//! Grants can be overridden per database and per table; an override
//! *replaces* the base grant entirely rather than merging with it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub db_overrides: HashMap<String, AccessControl>,
    #[serde(default)]
    pub table_overrides: HashMap<String, HashMap<String, AccessControl>>,
}

impl AccessControl {
    /// Grant for seeded bootstrap tokens.
    pub fn full_access() -> Self {
        Self {
            admin: true,
            create: true,
            read: true,
            write: true,
            ..Self::default()
        }
    }

    /// The effective grant for an operation on `db` (and `table`, when the
    /// operation is table-scoped). Most specific override wins; overrides
    /// replace the base grant.
    pub fn resolve(&self, db: &str, table: Option<&str>) -> &AccessControl {
        if let Some(table) = table {
            if let Some(grant) = self.table_overrides.get(db).and_then(|t| t.get(table)) {
                return grant;
            }
        }
        if let Some(grant) = self.db_overrides.get(db) {
            return grant;
        }
        self
    }

    // Admin implies every other right.

    pub fn can_read(&self) -> bool {
        self.read || self.admin
    }

    pub fn can_write(&self) -> bool {
        self.write || self.admin
    }

    pub fn can_create(&self) -> bool {
        self.create || self.admin
    }

    pub fn can_admin(&self) -> bool {
        self.admin
    }
}

/// Token alphabet check: ASCII digits, letters, and `-`, at least one
/// character. Anything else never reaches storage.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
