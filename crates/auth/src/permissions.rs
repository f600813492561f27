use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. "inventory.movement.confirm").
///
/// The wildcard `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));
    pub const MOVEMENT_READ: Permission = Permission(Cow::Borrowed("inventory.movement.read"));
    pub const MOVEMENT_WRITE: Permission = Permission(Cow::Borrowed("inventory.movement.write"));
    pub const MOVEMENT_CONFIRM: Permission = Permission(Cow::Borrowed("inventory.movement.confirm"));
    /// Elevated: deleting a movement whose stock effect was already applied.
    pub const MOVEMENT_DELETE_CONFIRMED: Permission =
        Permission(Cow::Borrowed("inventory.movement.delete_confirmed"));
    pub const STOCK_INGEST: Permission = Permission(Cow::Borrowed("inventory.stock.ingest"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
