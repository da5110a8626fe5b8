//! Authentication boundary for turbo-query.
//!
//! Provides the session gate, users and roles, and named authorization
//! policies.

mod error;
mod policy;
mod session;
mod user;

pub use error::AuthError;
pub use policy::{Policy, PolicyContext, PolicyRegistry, PolicyRegistryBuilder};
pub use session::{Navigator, NoopNavigator, Session, SessionGate, SessionStatus};
pub use user::{Role, User, UserId};
