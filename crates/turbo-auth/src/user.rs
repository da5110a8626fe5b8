//! User types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular customer.
    #[default]
    Customer,
    /// Store staff with limited admin access.
    Staff,
    /// Store administrator.
    Admin,
    /// Super admin with full access.
    SuperAdmin,
}

impl Role {
    /// Get role as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Check if this role has at least the given permission level.
    pub fn has_permission(&self, required: Role) -> bool {
        self.level() >= required.level()
    }

    /// Get permission level (higher = more permissions).
    pub fn level(&self) -> u8 {
        match self {
            Role::Customer => 0,
            Role::Staff => 1,
            Role::Admin => 2,
            Role::SuperAdmin => 3,
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(()),
        }
    }
}

/// Stable user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A verified identity, as returned by the session probe or a login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// User ID.
    pub id: UserId,
    /// Email address.
    pub email: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// User roles.
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Email verified status.
    #[serde(default)]
    pub email_verified: bool,
}

impl User {
    /// Create a new user.
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            email: email.into(),
            name: None,
            roles: Vec::new(),
            email_verified: false,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    /// Get display name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.email.as_str())
    }

    /// Check if user has a specific role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Check if user has at least the given permission level.
    pub fn has_permission(&self, required: Role) -> bool {
        self.roles.iter().any(|r| r.has_permission(required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_permissions() {
        assert!(Role::Admin.has_permission(Role::Customer));
        assert!(Role::Admin.has_permission(Role::Staff));
        assert!(Role::Admin.has_permission(Role::Admin));
        assert!(!Role::Admin.has_permission(Role::SuperAdmin));
    }

    #[test]
    fn test_role_round_trip_str() {
        for role in [Role::Customer, Role::Staff, Role::Admin, Role::SuperAdmin] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_user_permissions() {
        let admin = User::new("admin_1", "admin@example.com").with_role(Role::Admin);
        assert!(admin.has_permission(Role::Customer));
        assert!(admin.has_permission(Role::Staff));
        assert!(!admin.has_permission(Role::SuperAdmin));
        assert!(admin.has_role(Role::Admin));
        assert!(!admin.has_role(Role::Staff));
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = User::new("u1", "ada@example.com");
        assert_eq!(user.display_name(), "ada@example.com");
        assert_eq!(user.with_name("Ada").display_name(), "Ada");
    }

    #[test]
    fn test_user_from_probe_body() {
        let user: User = serde_json::from_str(
            r#"{"id":"u_42","email":"kim@example.com","roles":["staff"]}"#,
        )
        .unwrap();
        assert_eq!(user.id.as_str(), "u_42");
        assert_eq!(user.roles, vec![Role::Staff]);
        assert!(!user.email_verified);
    }
}
