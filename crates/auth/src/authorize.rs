use thiserror::Error;

use stockledger_core::LedgerError;

use crate::{Actor, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("actor has no name")]
    AnonymousActor,

    #[error("forbidden: role '{role}' lacks permission '{permission}'")]
    Forbidden { actor: String, role: String, permission: String },
}

impl From<AuthzError> for LedgerError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::AnonymousActor => LedgerError::validation_field(None, "actor", "actor has no name"),
            AuthzError::Forbidden { actor, permission, .. } => LedgerError::permission(actor, permission),
        }
    }
}

/// Default role → permission policy.
pub fn role_permissions(role: &str) -> Vec<Permission> {
    match role {
        "admin" => vec![Permission::WILDCARD],
        "manager" => vec![
            Permission::MOVEMENT_READ,
            Permission::MOVEMENT_WRITE,
            Permission::MOVEMENT_CONFIRM,
            Permission::MOVEMENT_DELETE_CONFIRMED,
            Permission::STOCK_INGEST,
        ],
        "warehouse" => vec![
            Permission::MOVEMENT_READ,
            Permission::MOVEMENT_WRITE,
            Permission::MOVEMENT_CONFIRM,
        ],
        "viewer" => vec![Permission::MOVEMENT_READ],
        _ => vec![],
    }
}

/// Authorize an actor against the default policy.
///
/// - No IO
/// - No panics
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    if actor.display_name().is_none() {
        return Err(AuthzError::AnonymousActor);
    }

    let granted = role_permissions(actor.role.as_str());
    if granted.iter().any(|p| p.is_wildcard() || p == required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            actor: actor.name.clone(),
            role: actor.role.as_str().to_string(),
            permission: required.as_str().to_string(),
        })
    }
}
