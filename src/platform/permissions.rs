//! Runtime permissions the sensor needs before it observes anything.

use std::collections::HashSet;

/// A runtime permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadContacts,
    ReadSms,
}

impl Permission {
    /// Android permission name.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReadContacts => "android.permission.READ_CONTACTS",
            Permission::ReadSms => "android.permission.READ_SMS",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permissions the messages sensor requires.
pub const REQUIRED_PERMISSIONS: [Permission; 2] = [Permission::ReadContacts, Permission::ReadSms];

/// Answers whether a permission is currently granted.
pub trait PermissionChecker: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;
}

/// Fixed set of granted permissions.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    granted: HashSet<Permission>,
}

impl StaticPermissions {
    pub fn all_granted() -> Self {
        Self::none().grant_all(REQUIRED_PERMISSIONS)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn grant(mut self, permission: Permission) -> Self {
        self.granted.insert(permission);
        self
    }

    pub fn grant_all(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.granted.extend(permissions);
        self
    }
}

impl PermissionChecker for StaticPermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }
}

/// Permissions from `required` that `checker` does not grant.
pub fn missing_permissions(
    checker: &dyn PermissionChecker,
    required: &[Permission],
) -> Vec<Permission> {
    required
        .iter()
        .copied()
        .filter(|p| !checker.is_granted(*p))
        .collect()
}
