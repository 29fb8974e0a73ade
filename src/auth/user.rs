use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::{Permission, Role, UserStatus};

/// The caller as resolved from a session token, profile joined in.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthUser {
    pub id: String,
    pub code: String,
    pub name: String,
    pub role: Role,
    pub status: UserStatus,
    pub must_change_password: bool,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub completed_profile: Option<bool>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbAuthUser {
    pub id: Option<String>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub must_change_password: Option<bool>,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub completed_profile: Option<bool>,
}

impl TryFrom<DbAuthUser> for AuthUser {
    type Error = AppError;

    fn try_from(user: DbAuthUser) -> Result<Self, Self::Error> {
        let role = user.role.unwrap_or_default();
        let status = user.status.unwrap_or_default();

        Ok(Self {
            id: user.id.unwrap_or_default(),
            code: user.code.unwrap_or_default(),
            name: user.name.unwrap_or_default(),
            role: role
                .parse()
                .map_err(|_| AppError::Internal(format!("Unknown stored role: {}", role)))?,
            status: status
                .parse()
                .map_err(|_| AppError::Internal(format!("Unknown stored status: {}", status)))?,
            must_change_password: user.must_change_password.unwrap_or_default(),
            course: user.course,
            year: user.year,
            semester: user.semester,
            completed_profile: user.completed_profile,
        })
    }
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Staff never onboard; everyone else does until the profile is complete.
    pub fn needs_profile(&self) -> bool {
        !self.is_staff() && self.completed_profile != Some(true)
    }

    /// Read-time decoration with the global academic semester. Never persisted.
    pub fn with_current_semester(mut self, semester: Option<i64>) -> Self {
        if let Some(semester) = semester {
            self.semester = Some(semester);
        }
        self
    }

    /// Course usable for access decisions; blank counts as unset.
    pub fn enrolled_course(&self) -> Option<&str> {
        self.course.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                code = %self.code,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::forbidden())
        }
    }
}

/// Public user fields returned by the auth endpoints.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionUser {
    pub id: String,
    pub code: String,
    pub name: String,
    pub role: Role,
    pub status: UserStatus,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub needs_profile: bool,
    pub needs_password_change: bool,
}

impl From<&AuthUser> for SessionUser {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id.clone(),
            code: user.code.clone(),
            name: user.name.clone(),
            role: user.role,
            status: user.status,
            course: user.course.clone(),
            year: user.year,
            semester: user.semester,
            needs_profile: user.needs_profile(),
            needs_password_change: user.must_change_password,
        }
    }
}
