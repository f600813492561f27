//! `stockledger-auth`: the identity boundary the ledger depends on.
//!
//! Authentication happens elsewhere; this crate only models the resolved
//! actor (`{name, role}`) and decides whether a role may perform a guarded
//! ledger transition.

pub mod actor;
pub mod authorize;
pub mod permissions;
pub mod roles;

pub use actor::Actor;
pub use authorize::{AuthzError, authorize, role_permissions};
pub use permissions::Permission;
pub use roles::Role;
