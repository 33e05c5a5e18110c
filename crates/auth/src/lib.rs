//! `orderflow-auth`: acting-actor context and capability checks.
//!
//! Authentication and session issuance live outside this system; callers hand
//! in an already authenticated [`Actor`] (employee number, acting role and
//! granted permissions) on every mutating call.

pub mod actor;
pub mod authorize;
pub mod permissions;
pub mod roles;

pub use actor::{Actor, EmpNo};
pub use authorize::{AuthzError, authorize};
pub use permissions::Permission;
pub use roles::Role;
