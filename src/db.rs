use crate::{
    auth::{DbUser, Role, User},
    error::AppError,
    models::{
        Content, Course, DbContent, Lookup, Message, Module, NewItem, PopularCourse, Subject,
        SubjectSummary,
    },
    ordering::{OrderedInsert, Partition, Placed},
};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

const COURSE_COLUMNS: &str = "id, owner_id, subject_id, title, slug, overview, created";
const COURSE_DEFAULT_ORDER: &str = "created DESC, id DESC";

#[instrument(skip(pool, password_hash))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password_hash: &str,
    role: Role,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(display_name.unwrap_or(username))
    .execute(pool)
    .await
    .map_err(|e| AppError::from_write(e, "User"))?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[derive(sqlx::FromRow)]
struct DbCredentials {
    #[sqlx(flatten)]
    user: DbUser,
    password: String,
}

/// User plus stored password hash, for identity checks only.
#[instrument(skip(pool))]
pub async fn find_user_credentials(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<(User, String)>, AppError> {
    let row = sqlx::query_as::<_, DbCredentials>(
        "SELECT id, username, role, display_name, password FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some((User::try_from(row.user)?, row.password))),
        None => Ok(None),
    }
}

#[instrument(skip(pool))]
pub async fn create_subject(
    pool: &Pool<Sqlite>,
    title: &str,
    slug: &str,
) -> Result<Subject, AppError> {
    info!("Creating subject");
    let subject = sqlx::query_as::<_, Subject>(
        "INSERT INTO subjects (title, slug) VALUES (?, ?) RETURNING id, title, slug",
    )
    .bind(title)
    .bind(slug)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_write(e, &format!("Subject with slug '{}'", slug)))?;

    Ok(subject)
}

#[instrument(skip(pool))]
pub async fn count_subjects(pool: &Pool<Sqlite>) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subjects")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip(pool))]
pub async fn list_subjects(
    pool: &Pool<Sqlite>,
    limit: i64,
    offset: i64,
) -> Result<Vec<SubjectSummary>, AppError> {
    info!("Listing subjects");
    let rows = sqlx::query_as::<_, SubjectSummary>(
        "SELECT s.id, s.title, s.slug, COUNT(c.id) AS total_courses
         FROM subjects s
         LEFT JOIN courses c ON c.subject_id = s.id
         GROUP BY s.id
         ORDER BY s.title, s.id
         LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn get_subject(
    pool: &Pool<Sqlite>,
    lookup: &Lookup,
) -> Result<SubjectSummary, AppError> {
    info!("Getting subject");
    let base = "SELECT s.id, s.title, s.slug, COUNT(c.id) AS total_courses
         FROM subjects s
         LEFT JOIN courses c ON c.subject_id = s.id";

    let row = match lookup {
        Lookup::Id(id) => {
            sqlx::query_as::<_, SubjectSummary>(&format!("{} WHERE s.id = ? GROUP BY s.id", base))
                .bind(*id)
                .fetch_optional(pool)
                .await?
        }
        Lookup::Slug(slug) => {
            sqlx::query_as::<_, SubjectSummary>(&format!(
                "{} WHERE s.slug = ? GROUP BY s.id",
                base
            ))
            .bind(slug)
            .fetch_optional(pool)
            .await?
        }
    };

    row.ok_or_else(|| AppError::NotFound(format!("Subject {} not found", lookup)))
}

/// Courses of a subject ranked by how many students joined them.
#[instrument(skip(pool))]
pub async fn get_popular_courses(
    pool: &Pool<Sqlite>,
    subject_id: i64,
    limit: i64,
) -> Result<Vec<PopularCourse>, AppError> {
    let rows = sqlx::query_as::<_, PopularCourse>(
        "SELECT c.title, COUNT(cs.user_id) AS total_students
         FROM courses c
         LEFT JOIN course_students cs ON cs.course_id = c.id
         WHERE c.subject_id = ?
         GROUP BY c.id
         ORDER BY total_students DESC, c.created DESC, c.id DESC
         LIMIT ?",
    )
    .bind(subject_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn create_course(
    pool: &Pool<Sqlite>,
    owner_id: i64,
    subject_id: i64,
    title: &str,
    slug: &str,
    overview: &str,
) -> Result<Course, AppError> {
    info!("Creating course");
    let course = sqlx::query_as::<_, Course>(&format!(
        "INSERT INTO courses (owner_id, subject_id, title, slug, overview, created)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING {}",
        COURSE_COLUMNS
    ))
    .bind(owner_id)
    .bind(subject_id)
    .bind(title)
    .bind(slug)
    .bind(overview)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from_write(e, &format!("Course with slug '{}'", slug)))?;

    Ok(course)
}

#[instrument(skip(pool))]
pub async fn count_courses(pool: &Pool<Sqlite>) -> Result<i64, AppError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM courses")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip(pool))]
pub async fn list_courses(
    pool: &Pool<Sqlite>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Course>, AppError> {
    info!("Listing courses");
    let rows = sqlx::query_as::<_, Course>(&format!(
        "SELECT {} FROM courses ORDER BY {} LIMIT ? OFFSET ?",
        COURSE_COLUMNS, COURSE_DEFAULT_ORDER
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn find_course(
    pool: &Pool<Sqlite>,
    lookup: &Lookup,
) -> Result<Option<Course>, AppError> {
    let row = match lookup {
        Lookup::Id(id) => {
            sqlx::query_as::<_, Course>(&format!(
                "SELECT {} FROM courses WHERE id = ?",
                COURSE_COLUMNS
            ))
            .bind(*id)
            .fetch_optional(pool)
            .await?
        }
        Lookup::Slug(slug) => {
            sqlx::query_as::<_, Course>(&format!(
                "SELECT {} FROM courses WHERE slug = ?",
                COURSE_COLUMNS
            ))
            .bind(slug)
            .fetch_optional(pool)
            .await?
        }
    };

    Ok(row)
}

#[instrument(skip(pool))]
pub async fn get_course(pool: &Pool<Sqlite>, lookup: &Lookup) -> Result<Course, AppError> {
    info!("Getting course");
    find_course(pool, lookup)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Course {} not found", lookup)))
}

/// Removes the course along with its modules, contents, items, enrollments
/// and chat history.
#[instrument(skip(pool))]
pub async fn delete_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<(), AppError> {
    info!("Deleting course");
    let res = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(course_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Course {} not found", course_id)));
    }
    Ok(())
}

/// Adds the user to the course's students. Returns whether the user was
/// newly enrolled; enrolling twice is a no-op.
#[instrument(skip(pool))]
pub async fn enroll_student(
    pool: &Pool<Sqlite>,
    course_id: i64,
    user_id: i64,
) -> Result<bool, AppError> {
    info!("Enrolling student in course");
    let res =
        sqlx::query("INSERT OR IGNORE INTO course_students (course_id, user_id) VALUES (?, ?)")
            .bind(course_id)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(|e| AppError::from_write(e, "Enrollment"))?;

    Ok(res.rows_affected() > 0)
}

#[instrument(skip(pool))]
pub async fn is_enrolled(
    pool: &Pool<Sqlite>,
    course_id: i64,
    user_id: i64,
) -> Result<bool, AppError> {
    let enrolled = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM course_students WHERE course_id = ? AND user_id = ?)",
    )
    .bind(course_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(enrolled)
}

#[instrument(skip(pool))]
pub async fn get_enrolled_courses(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Course>, AppError> {
    info!("Getting enrolled courses");
    let rows = sqlx::query_as::<_, Course>(&format!(
        "SELECT {} FROM courses
         WHERE id IN (SELECT course_id FROM course_students WHERE user_id = ?)
         ORDER BY {}",
        COURSE_COLUMNS, COURSE_DEFAULT_ORDER
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn create_module(
    pool: &Pool<Sqlite>,
    course_id: i64,
    title: &str,
    description: &str,
    order: Option<i64>,
) -> Result<Placed, AppError> {
    info!("Creating module");
    let mut conn = pool.acquire().await?;

    OrderedInsert::new(Partition::Course(course_id))
        .column("title", title)
        .column("description", description)
        .order(order)
        .execute(&mut conn)
        .await
}

#[instrument(skip(pool))]
pub async fn get_modules(pool: &Pool<Sqlite>, course_id: i64) -> Result<Vec<Module>, AppError> {
    let rows = sqlx::query_as::<_, Module>(
        "SELECT id, course_id, title, description, \"order\"
         FROM modules
         WHERE course_id = ?
         ORDER BY \"order\", id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn get_module(pool: &Pool<Sqlite>, module_id: i64) -> Result<Module, AppError> {
    let row = sqlx::query_as::<_, Module>(
        "SELECT id, course_id, title, description, \"order\" FROM modules WHERE id = ?",
    )
    .bind(module_id)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("Module {} not found", module_id)))
}

#[instrument(skip(pool))]
pub async fn delete_module(pool: &Pool<Sqlite>, module_id: i64) -> Result<(), AppError> {
    info!("Deleting module");
    let res = sqlx::query("DELETE FROM modules WHERE id = ?")
        .bind(module_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Module {} not found", module_id)));
    }
    Ok(())
}

/// Creates the item and the content slot pointing at it in one transaction.
#[instrument(skip(pool, item), fields(kind = %item.kind()))]
pub async fn create_content(
    pool: &Pool<Sqlite>,
    module_id: i64,
    owner_id: i64,
    item: &NewItem,
    order: Option<i64>,
) -> Result<Placed, AppError> {
    info!("Creating content");
    let now = Utc::now();
    let (content, file, url) = match item {
        NewItem::Text { content, .. } => (Some(content.as_str()), None, None),
        NewItem::File { file, .. } | NewItem::Image { file, .. } => {
            (None, Some(file.as_str()), None)
        }
        NewItem::Video { url, .. } => (None, None, Some(url.as_str())),
    };

    let mut tx = pool.begin().await?;

    // Writing first takes the write lock before anything is read.
    let item_id = sqlx::query(
        "INSERT INTO items (kind, owner_id, title, created, updated, content, file, url)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(item.kind().as_str())
    .bind(owner_id)
    .bind(item.title())
    .bind(now)
    .bind(now)
    .bind(content)
    .bind(file)
    .bind(url)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::from_write(e, "Item"))?
    .last_insert_rowid();

    let placed = OrderedInsert::new(Partition::Module(module_id))
        .column("item_id", item_id)
        .order(order)
        .execute(&mut tx)
        .await?;

    tx.commit().await?;
    Ok(placed)
}

#[instrument(skip(pool))]
pub async fn get_contents(pool: &Pool<Sqlite>, module_id: i64) -> Result<Vec<Content>, AppError> {
    let rows = sqlx::query_as::<_, DbContent>(
        "SELECT c.id AS content_id, c.module_id, c.\"order\",
                i.id, i.kind, i.owner_id, i.title, i.created, i.updated, i.content, i.file, i.url
         FROM contents c
         JOIN items i ON i.id = c.item_id
         WHERE c.module_id = ?
         ORDER BY c.\"order\", c.id",
    )
    .bind(module_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Content::try_from).collect()
}

/// Owner of the course a content slot belongs to.
#[instrument(skip(pool))]
pub async fn get_content_course_owner(
    pool: &Pool<Sqlite>,
    content_id: i64,
) -> Result<i64, AppError> {
    let owner = sqlx::query_scalar::<_, i64>(
        "SELECT co.owner_id
         FROM contents c
         JOIN modules m ON m.id = c.module_id
         JOIN courses co ON co.id = m.course_id
         WHERE c.id = ?",
    )
    .bind(content_id)
    .fetch_optional(pool)
    .await?;

    owner.ok_or_else(|| AppError::NotFound(format!("Content {} not found", content_id)))
}

/// Deletes the content slot. Its item goes with it once nothing else
/// points at it.
#[instrument(skip(pool))]
pub async fn delete_content(pool: &Pool<Sqlite>, content_id: i64) -> Result<(), AppError> {
    info!("Deleting content");
    let res = sqlx::query("DELETE FROM contents WHERE id = ?")
        .bind(content_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Content {} not found", content_id)));
    }
    Ok(())
}

#[instrument(skip(pool, content))]
pub async fn create_message(
    pool: &Pool<Sqlite>,
    course_id: i64,
    user_id: i64,
    content: &str,
) -> Result<Message, AppError> {
    info!("Storing chat message");
    let id = sqlx::query(
        "INSERT INTO messages (user_id, course_id, content, sent_on) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(content)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| AppError::from_write(e, "Message"))?
    .last_insert_rowid();

    let message = sqlx::query_as::<_, Message>(
        "SELECT m.id, m.user_id, u.username, m.course_id, m.content, m.sent_on
         FROM messages m
         JOIN users u ON u.id = m.user_id
         WHERE m.id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    Ok(message)
}

#[instrument(skip(pool))]
pub async fn get_messages(pool: &Pool<Sqlite>, course_id: i64) -> Result<Vec<Message>, AppError> {
    let rows = sqlx::query_as::<_, Message>(
        "SELECT m.id, m.user_id, u.username, m.course_id, m.content, m.sent_on
         FROM messages m
         JOIN users u ON u.id = m.user_id
         WHERE m.course_id = ?
         ORDER BY m.sent_on, m.id",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
