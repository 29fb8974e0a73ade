use once_cell::sync::Lazy;
use rocket::FromFormField;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ManageMaterials,
    ViewUserStats,

    ManageUsers,
    ViewAuditLog,
    ManageCourses,
    ManageAcademic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[field(value = "USER")]
    User,
    #[field(value = "CONTENT_MANAGER")]
    ContentManager,
    #[field(value = "ADMIN")]
    Admin,
}

crate::text_enum!(Role {
    User => "USER",
    ContentManager => "CONTENT_MANAGER",
    Admin => "ADMIN",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    #[field(value = "ACTIVE")]
    Active,
    #[field(value = "INACTIVE")]
    Inactive,
}

crate::text_enum!(UserStatus {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
});

static USER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(HashSet::new);

static CONTENT_MANAGER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(USER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageMaterials);
    permissions.insert(Permission::ViewUserStats);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(CONTENT_MANAGER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageUsers);
    permissions.insert(Permission::ViewAuditLog);
    permissions.insert(Permission::ManageCourses);
    permissions.insert(Permission::ManageAcademic);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::User => &USER_PERMISSIONS,
            Role::ContentManager => &CONTENT_MANAGER_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::ContentManager)
    }
}
