use serde::Serialize;
use std::str::FromStr;

use crate::error::AppError;

use super::{Permission, Role};

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub display_name: String,
}

impl TryFrom<DbUser> for User {
    type Error = AppError;

    fn try_from(user: DbUser) -> Result<Self, Self::Error> {
        Ok(Self {
            id: user.id,
            role: Role::from_str(&user.role)?,
            username: user.username,
            display_name: user.display_name,
        })
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(
                "You don't have permission to perform this action".to_string(),
            ))
        }
    }

    /// Owners manage their own courses; `ManageAllCourses` covers everyone else's.
    pub fn require_course_management(&self, owner_id: i64) -> Result<(), AppError> {
        if self.has_permission(Permission::ManageAllCourses) {
            return Ok(());
        }
        self.require_permission(Permission::ManageOwnCourses)?;

        if self.id == owner_id {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                owner_id = %owner_id,
                "Course management denied for non-owner"
            );
            Err(AppError::Authorization(
                "Only the course owner can change this course".to_string(),
            ))
        }
    }
}
