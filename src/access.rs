//! Material access policy.
//!
//! [`can_access`] is the single decision used before every metadata, cover,
//! PDF, progress and note access. [`restrict_to_accessible`] is its SQL
//! rendition for list queries and must agree with it row for row.

use sqlx::{QueryBuilder, Sqlite};

use crate::auth::{AuthUser, Role};
use crate::models::{Material, MaterialKind, MaterialStatus, Visibility};

pub fn can_access(user: &AuthUser, material: &Material) -> bool {
    decide(
        user.role,
        user.enrolled_course(),
        material.status,
        material.kind,
        material.visibility,
        material.course.as_deref(),
    )
}

pub fn decide(
    role: Role,
    user_course: Option<&str>,
    status: MaterialStatus,
    kind: MaterialKind,
    visibility: Visibility,
    material_course: Option<&str>,
) -> bool {
    use MaterialKind::*;
    use MaterialStatus::*;
    use Visibility::*;

    match (role, status, kind, visibility) {
        (Role::Admin | Role::ContentManager, _, _, _) => true,
        (Role::User, Inactive, _, _) => false,
        (Role::User, Active, Module, _) => true,
        (Role::User, Active, Publication, Public) => true,
        (Role::User, Active, Publication, Private) => {
            match (user_course, material_course.filter(|c| !c.trim().is_empty())) {
                (Some(mine), Some(theirs)) => mine == theirs,
                _ => false,
            }
        }
    }
}

/// Anonymous catalog visibility.
pub fn is_public(material: &Material) -> bool {
    material.status == MaterialStatus::Active
        && material.kind == MaterialKind::Publication
        && material.visibility == Visibility::Public
}

/// Appends ` AND (...)` limiting `alias` rows to what `user` may open.
/// Staff get no restriction.
pub fn restrict_to_accessible(builder: &mut QueryBuilder<'_, Sqlite>, alias: &str, user: &AuthUser) {
    if user.is_staff() {
        return;
    }

    builder.push(format!(" AND {alias}.status = "));
    builder.push_bind(MaterialStatus::Active.as_str());
    builder.push(format!(" AND ({alias}.kind = "));
    builder.push_bind(MaterialKind::Module.as_str());
    builder.push(format!(" OR ({alias}.kind = "));
    builder.push_bind(MaterialKind::Publication.as_str());
    builder.push(format!(" AND {alias}.visibility = "));
    builder.push_bind(Visibility::Public.as_str());
    builder.push(")");

    if let Some(course) = user.enrolled_course() {
        builder.push(format!(" OR ({alias}.kind = "));
        builder.push_bind(MaterialKind::Publication.as_str());
        builder.push(format!(" AND {alias}.visibility = "));
        builder.push_bind(Visibility::Private.as_str());
        builder.push(format!(" AND {alias}.course = "));
        builder.push_bind(course.to_string());
        builder.push(")");
    }

    builder.push(")");
}

/// Appends ` AND (...)` limiting `alias` rows to the anonymous catalog.
pub fn restrict_to_public(builder: &mut QueryBuilder<'_, Sqlite>, alias: &str) {
    builder.push(format!(" AND {alias}.status = "));
    builder.push_bind(MaterialStatus::Active.as_str());
    builder.push(format!(" AND {alias}.kind = "));
    builder.push_bind(MaterialKind::Publication.as_str());
    builder.push(format!(" AND {alias}.visibility = "));
    builder.push_bind(Visibility::Public.as_str());
}
