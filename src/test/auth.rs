#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::auth::{
        BasicCredentials, DatabaseIdentity, IdentityProvider, Permission, Role, User,
    };
    use crate::error::AppError;
    use crate::test::utils::{STANDARD_PASSWORD, create_standard_test_db};

    use rocket::tokio;

    fn user(id: i64, role: Role) -> User {
        User {
            id,
            username: format!("user{}", id),
            role,
            display_name: format!("User {}", id),
        }
    }

    #[test]
    fn test_role_permissions_nest() {
        assert!(Role::Student.has_permission(Permission::EnrollInCourses));
        assert!(Role::Student.has_permission(Permission::PostChatMessages));
        assert!(!Role::Student.has_permission(Permission::ManageOwnCourses));

        assert!(Role::Instructor.has_permission(Permission::EnrollInCourses));
        assert!(Role::Instructor.has_permission(Permission::ManageOwnCourses));
        assert!(!Role::Instructor.has_permission(Permission::ManageAllCourses));
        assert!(!Role::Instructor.has_permission(Permission::ManageSubjects));

        for permission in Role::Instructor.permissions() {
            assert!(Role::Admin.has_permission(*permission));
        }
        assert!(Role::Admin.has_permission(Permission::ManageSubjects));
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::Student, Role::Instructor, Role::Admin] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
        assert!(matches!(Role::from_str("janitor"), Err(AppError::Internal(_))));
    }

    #[test]
    fn test_course_management_rules() {
        let owner = user(1, Role::Instructor);
        let other = user(2, Role::Instructor);
        let student = user(3, Role::Student);
        let admin = user(4, Role::Admin);

        assert!(owner.require_course_management(1).is_ok());
        assert!(matches!(
            other.require_course_management(1),
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            student.require_course_management(3),
            Err(AppError::Authorization(_))
        ));
        assert!(admin.require_course_management(1).is_ok());
    }

    #[test]
    fn test_basic_credentials_parse() {
        let header = BasicCredentials::encode("alice", "s3cret:with:colons");
        let parsed = BasicCredentials::parse(&header).unwrap();

        assert_eq!(parsed.username, "alice");
        assert_eq!(parsed.password, "s3cret:with:colons");

        // aladdin:opensesame
        let lowercase = BasicCredentials::parse("basic YWxhZGRpbjpvcGVuc2VzYW1l").unwrap();
        assert_eq!(lowercase.username, "aladdin");
        assert_eq!(lowercase.password, "opensesame");
    }

    #[test]
    fn test_basic_credentials_reject_malformed_headers() {
        assert!(BasicCredentials::parse("Bearer abc").is_none());
        assert!(BasicCredentials::parse("Basic").is_none());
        assert!(BasicCredentials::parse("Basic not-base64!").is_none());
        // "nocolon"
        assert!(BasicCredentials::parse("Basic bm9jb2xvbg==").is_none());
        // ":password"
        assert!(BasicCredentials::parse("Basic OnBhc3N3b3Jk").is_none());
    }

    #[tokio::test]
    async fn test_database_identity() {
        let test_db = create_standard_test_db().await;
        let identity = DatabaseIdentity::new(test_db.pool.clone());

        let user = identity
            .authenticate("student1", STANDARD_PASSWORD)
            .await
            .unwrap()
            .expect("valid credentials");
        assert_eq!(user.id, test_db.user_id("student1"));
        assert_eq!(user.role, Role::Student);

        assert!(
            identity
                .authenticate("student1", "wrong")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            identity
                .authenticate("ghost", STANDARD_PASSWORD)
                .await
                .unwrap()
                .is_none()
        );
    }
}
