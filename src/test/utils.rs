use rocket::http::Header;
use rocket::local::asynchronous::Client;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Once;

use crate::auth::{BasicCredentials, Role, hash_password};
use crate::db::{create_content, create_course, create_module, create_subject, create_user, enroll_student};
use crate::env::Settings;
use crate::error::AppError;
use crate::init_rocket;
use crate::models::NewItem;

static INIT: Once = Once::new();
pub static STANDARD_PASSWORD: &str = "password123";
/// Lowest cost bcrypt accepts; keeps fixtures fast.
pub const TEST_HASH_COST: u32 = 4;

#[derive(Default)]
pub struct TestDbBuilder {
    users: Vec<TestUser>,
    subjects: Vec<TestSubject>,
    courses: Vec<TestCourse>,
    modules: Vec<TestModule>,
    contents: Vec<TestContent>,
    enrollments: Vec<(String, String)>,
}

pub struct TestUser {
    pub username: String,
    pub role: Role,
}

pub struct TestSubject {
    pub title: String,
    pub slug: String,
}

pub struct TestCourse {
    pub owner: String,
    pub subject: String,
    pub title: String,
    pub slug: String,
}

pub struct TestModule {
    pub course: String,
    pub title: String,
}

pub struct TestContent {
    pub module: String,
    pub item: NewItem,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn user(mut self, username: &str, role: Role) -> Self {
        self.users.push(TestUser {
            username: username.to_string(),
            role,
        });
        self
    }

    pub fn student(self, username: &str) -> Self {
        self.user(username, Role::Student)
    }

    pub fn instructor(self, username: &str) -> Self {
        self.user(username, Role::Instructor)
    }

    pub fn admin(self, username: &str) -> Self {
        self.user(username, Role::Admin)
    }

    pub fn subject(mut self, title: &str, slug: &str) -> Self {
        self.subjects.push(TestSubject {
            title: title.to_string(),
            slug: slug.to_string(),
        });
        self
    }

    pub fn course(mut self, owner: &str, subject: &str, title: &str, slug: &str) -> Self {
        self.courses.push(TestCourse {
            owner: owner.to_string(),
            subject: subject.to_string(),
            title: title.to_string(),
            slug: slug.to_string(),
        });
        self
    }

    /// Modules are appended in declaration order. Titles double as lookup keys.
    pub fn module(mut self, course: &str, title: &str) -> Self {
        self.modules.push(TestModule {
            course: course.to_string(),
            title: title.to_string(),
        });
        self
    }

    pub fn text(mut self, module: &str, title: &str, content: &str) -> Self {
        self.contents.push(TestContent {
            module: module.to_string(),
            item: NewItem::Text {
                title: title.to_string(),
                content: content.to_string(),
            },
        });
        self
    }

    pub fn content(mut self, module: &str, item: NewItem) -> Self {
        self.contents.push(TestContent {
            module: module.to_string(),
            item,
        });
        self
    }

    pub fn enroll(mut self, course: &str, username: &str) -> Self {
        self.enrollments
            .push((course.to_string(), username.to_string()));
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .parse_filters("debug")
                .is_test(true)
                .try_init();
        });

        let pool = SqlitePool::connect("sqlite::memory:").await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let mut db = TestDb {
            pool,
            user_id_map: HashMap::new(),
            subject_id_map: HashMap::new(),
            course_id_map: HashMap::new(),
            module_id_map: HashMap::new(),
        };

        let password_hash = hash_password(STANDARD_PASSWORD, TEST_HASH_COST)?;
        for user in &self.users {
            let user_id =
                create_user(&db.pool, &user.username, &password_hash, user.role, None).await?;
            db.user_id_map.insert(user.username.clone(), user_id);
        }

        for subject in &self.subjects {
            let created = create_subject(&db.pool, &subject.title, &subject.slug).await?;
            db.subject_id_map.insert(subject.slug.clone(), created.id);
        }

        for course in &self.courses {
            let owner_id = db.require(&db.user_id_map, &course.owner)?;
            let subject_id = db.require(&db.subject_id_map, &course.subject)?;
            let created = create_course(
                &db.pool,
                owner_id,
                subject_id,
                &course.title,
                &course.slug,
                &format!("An introduction to {}", course.title),
            )
            .await?;
            db.course_id_map.insert(course.slug.clone(), created.id);
        }

        for module in &self.modules {
            let course_id = db.require(&db.course_id_map, &module.course)?;
            let placed = create_module(&db.pool, course_id, &module.title, "", None).await?;
            db.module_id_map.insert(module.title.clone(), placed.id);
        }

        for content in &self.contents {
            let module_id = db.require(&db.module_id_map, &content.module)?;
            let owner_id: i64 = sqlx::query_scalar(
                "SELECT c.owner_id FROM courses c JOIN modules m ON m.course_id = c.id WHERE m.id = ?",
            )
            .bind(module_id)
            .fetch_one(&db.pool)
            .await?;
            create_content(&db.pool, module_id, owner_id, &content.item, None).await?;
        }

        for (course, username) in &self.enrollments {
            let course_id = db.require(&db.course_id_map, course)?;
            let user_id = db.require(&db.user_id_map, username)?;
            enroll_student(&db.pool, course_id, user_id).await?;
        }

        Ok(db)
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    pub user_id_map: HashMap<String, i64>,
    pub subject_id_map: HashMap<String, i64>,
    pub course_id_map: HashMap<String, i64>,
    pub module_id_map: HashMap<String, i64>,
}

impl TestDb {
    fn require(&self, map: &HashMap<String, i64>, key: &str) -> Result<i64, AppError> {
        map.get(key)
            .copied()
            .ok_or_else(|| AppError::Internal(format!("Fixture {} was not declared", key)))
    }

    pub fn user_id(&self, username: &str) -> i64 {
        self.user_id_map[username]
    }

    pub fn subject_id(&self, slug: &str) -> i64 {
        self.subject_id_map[slug]
    }

    pub fn course_id(&self, slug: &str) -> i64 {
        self.course_id_map[slug]
    }

    pub fn module_id(&self, title: &str) -> i64 {
        self.module_id_map[title]
    }
}

/// Two instructors, two students and an admin; student1 is enrolled in
/// `algebra`, which has two modules.
pub async fn create_standard_test_db() -> TestDb {
    TestDbBuilder::new()
        .instructor("instructor1")
        .instructor("instructor2")
        .student("student1")
        .student("student2")
        .admin("admin")
        .subject("Mathematics", "mathematics")
        .subject("Programming", "programming")
        .course("instructor1", "mathematics", "Algebra", "algebra")
        .course("instructor1", "programming", "Rust Basics", "rust-basics")
        .course("instructor2", "programming", "Python 101", "python-101")
        .module("algebra", "Linear equations")
        .module("algebra", "Quadratics")
        .text("Linear equations", "Welcome", "Solve for x.\n\nThen check your work.")
        .enroll("algebra", "student1")
        .build()
        .await
        .expect("Failed to build standard test database")
}

pub fn test_settings() -> Settings {
    Settings {
        database_url: "sqlite::memory:".to_string(),
        password_hash_cost: TEST_HASH_COST,
        ..Settings::default()
    }
}

pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
    let rocket = init_rocket(test_db.pool.clone(), test_settings()).await;
    let client = Client::tracked(rocket)
        .await
        .expect("Failed to build rocket client");

    (client, test_db)
}

pub fn basic_auth(username: &str) -> Header<'static> {
    Header::new(
        "Authorization",
        BasicCredentials::encode(username, STANDARD_PASSWORD),
    )
}
