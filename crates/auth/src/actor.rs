use serde::{Deserialize, Serialize};

use crate::Role;

/// The authenticated principal performing a ledger transition.
///
/// Supplied by the identity collaborator; `name` is what gets stamped into
/// `processed_by` / `confirmed_by`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    /// Trimmed display name, `None` when blank.
    pub fn display_name(&self) -> Option<&str> {
        let name = self.name.trim();
        (!name.is_empty()).then_some(name)
    }
}
