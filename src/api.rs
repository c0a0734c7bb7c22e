use chrono::{DateTime, Utc};
use rocket::State;
use rocket::http::Status;
use rocket::request::FromParam;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, Role, User, hash_password};
use crate::db::{
    count_courses, count_subjects, create_content, create_course, create_message, create_module,
    create_subject, create_user, delete_content, delete_course, delete_module, enroll_student,
    find_course, find_user_by_username, get_content_course_owner, get_contents, get_course,
    get_enrolled_courses, get_messages, get_module, get_modules, get_popular_courses,
    get_subject, get_user, is_enrolled, list_courses, list_subjects,
};
use crate::env::Settings;
use crate::error::AppError;
use crate::models::{Course, Lookup, Message, Module, NewItem, Subject, SubjectSummary};
use crate::pagination::{Page, PageParams, Paginated};
use crate::render::RenderContext;
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, ValidationErrorWrapper, ValidationResponse,
    validate_not_blank, validate_slug,
};

pub const POPULAR_COURSES_LIMIT: i64 = 3;

impl<'a> FromParam<'a> for Lookup {
    type Error = std::convert::Infallible;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        Ok(Lookup::parse(param))
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SubjectResponse {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub total_courses: i64,
    pub popular_courses: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ModuleResponse {
    pub order: i64,
    pub title: String,
    pub description: String,
}

impl From<Module> for ModuleResponse {
    fn from(module: Module) -> Self {
        Self {
            order: module.order,
            title: module.title,
            description: module.description,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CourseResponse {
    pub id: i64,
    pub subject: i64,
    pub title: String,
    pub slug: String,
    pub overview: String,
    pub created: DateTime<Utc>,
    pub owner: i64,
    pub modules: Vec<ModuleResponse>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ContentResponse {
    pub order: i64,
    pub item: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ModuleWithContentsResponse {
    pub order: i64,
    pub title: String,
    pub description: String,
    pub contents: Vec<ContentResponse>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CourseWithContentsResponse {
    pub id: i64,
    pub subject: i64,
    pub title: String,
    pub slug: String,
    pub overview: String,
    pub created: DateTime<Utc>,
    pub owner: i64,
    pub modules: Vec<ModuleWithContentsResponse>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EnrollResponse {
    pub enrolled: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ModuleLink {
    pub id: i64,
    pub order: i64,
    pub title: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StudentCourseDetailResponse {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub overview: String,
    pub modules: Vec<ModuleLink>,
    pub module: Option<ModuleWithContentsResponse>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PlacedResponse {
    pub id: i64,
    pub order: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PlacedContentResponse {
    pub id: i64,
    pub order: i64,
    pub kind: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role.to_string(),
        }
    }
}

async fn subject_response(
    db: &Pool<Sqlite>,
    subject: SubjectSummary,
) -> Result<SubjectResponse, AppError> {
    let popular = get_popular_courses(db, subject.id, POPULAR_COURSES_LIMIT).await?;

    Ok(SubjectResponse {
        id: subject.id,
        title: subject.title,
        slug: subject.slug,
        total_courses: subject.total_courses,
        popular_courses: popular.iter().map(ToString::to_string).collect(),
    })
}

async fn course_response(db: &Pool<Sqlite>, course: Course) -> Result<CourseResponse, AppError> {
    let modules = get_modules(db, course.id).await?;

    Ok(CourseResponse {
        id: course.id,
        subject: course.subject_id,
        title: course.title,
        slug: course.slug,
        overview: course.overview,
        created: course.created,
        owner: course.owner_id,
        modules: modules.into_iter().map(ModuleResponse::from).collect(),
    })
}

async fn module_with_contents(
    db: &Pool<Sqlite>,
    module: Module,
    ctx: &RenderContext,
) -> Result<ModuleWithContentsResponse, AppError> {
    let contents = get_contents(db, module.id).await?;

    Ok(ModuleWithContentsResponse {
        order: module.order,
        title: module.title,
        description: module.description,
        contents: contents
            .iter()
            .map(|content| ContentResponse {
                order: content.order,
                item: content.item.render(ctx),
            })
            .collect(),
    })
}

/// Resolves a course the caller is enrolled in. Unknown courses and courses
/// the caller has not joined are indistinguishable.
async fn enrolled_course(db: &Pool<Sqlite>, key: &Lookup, user: &User) -> Result<Course, AppError> {
    user.require_permission(Permission::ViewEnrolledContents)?;

    if let Some(course) = find_course(db, key).await? {
        if is_enrolled(db, course.id, user.id).await? {
            return Ok(course);
        }
    }

    Err(AppError::Authorization(
        "You are not enrolled in this course".to_string(),
    ))
}

/// Chat is open to enrolled students and to the course owner.
async fn chat_course(db: &Pool<Sqlite>, key: &Lookup, user: &User) -> Result<Course, AppError> {
    if let Some(course) = find_course(db, key).await? {
        if course.owner_id == user.id || is_enrolled(db, course.id, user.id).await? {
            return Ok(course);
        }
    }

    Err(AppError::Authorization(
        "You are not a member of this course".to_string(),
    ))
}

#[get("/subjects?<params..>")]
pub async fn api_list_subjects(
    params: PageParams,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Paginated<SubjectResponse>>, AppError> {
    let page = Page::resolve(&params, count_subjects(db).await?)?;

    let mut results = Vec::new();
    for subject in list_subjects(db, page.limit(), page.offset()).await? {
        results.push(subject_response(db, subject).await?);
    }

    Ok(Json(Paginated::new(&page, "/api/subjects", results)))
}

#[get("/subjects/<key>")]
pub async fn api_get_subject(
    key: Lookup,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SubjectResponse>, AppError> {
    let subject = get_subject(db, &key).await?;
    Ok(Json(subject_response(db, subject).await?))
}

#[derive(Deserialize, Serialize, Validate)]
pub struct CreateSubjectRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    title: String,
    #[validate(
        length(min = 1, max = 200, message = "Slug must be 1 to 200 characters"),
        custom(function = "validate_slug")
    )]
    slug: String,
}

#[post("/subjects", data = "<request>")]
pub async fn api_create_subject(
    request: Json<CreateSubjectRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Subject>>, ApiError> {
    user.require_permission(Permission::ManageSubjects)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let subject = create_subject(db, &validated.title, &validated.slug)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(subject)))
}

#[get("/courses?<params..>")]
pub async fn api_list_courses(
    params: PageParams,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Paginated<CourseResponse>>, AppError> {
    let page = Page::resolve(&params, count_courses(db).await?)?;

    let mut results = Vec::new();
    for course in list_courses(db, page.limit(), page.offset()).await? {
        results.push(course_response(db, course).await?);
    }

    Ok(Json(Paginated::new(&page, "/api/courses", results)))
}

#[get("/courses/<key>")]
pub async fn api_get_course(
    key: Lookup,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CourseResponse>, AppError> {
    let course = get_course(db, &key).await?;
    Ok(Json(course_response(db, course).await?))
}

#[derive(Deserialize, Serialize, Validate)]
pub struct CreateCourseRequest {
    subject: i64,
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    title: String,
    #[validate(
        length(min = 1, max = 200, message = "Slug must be 1 to 200 characters"),
        custom(function = "validate_slug")
    )]
    slug: String,
    #[validate(length(min = 1, message = "Overview is required"))]
    overview: String,
}

#[post("/courses", data = "<request>")]
pub async fn api_create_course(
    request: Json<CreateCourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CourseResponse>>, ApiError> {
    user.require_permission(Permission::ManageOwnCourses)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    get_subject(db, &Lookup::Id(validated.subject))
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => {
                AppError::Validation(format!("Subject {} does not exist", validated.subject))
            }
            other => other,
        })
        .validate_custom()?;

    let course = create_course(
        db,
        user.id,
        validated.subject,
        &validated.title,
        &validated.slug,
        &validated.overview,
    )
    .await
    .validate_custom()?;

    let response = course_response(db, course).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(response)))
}

#[delete("/courses/<key>")]
pub async fn api_delete_course(
    key: Lookup,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, AppError> {
    let course = get_course(db, &key).await?;
    user.require_course_management(course.owner_id)?;

    delete_course(db, course.id).await?;
    Ok(Status::NoContent)
}

#[post("/courses/<key>/enroll")]
pub async fn api_enroll(
    key: Lookup,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<EnrollResponse>, AppError> {
    user.require_permission(Permission::EnrollInCourses)?;

    let course = get_course(db, &key).await?;
    enroll_student(db, course.id, user.id).await?;

    Ok(Json(EnrollResponse { enrolled: true }))
}

#[get("/courses/<key>/contents")]
pub async fn api_course_contents(
    key: Lookup,
    user: User,
    db: &State<Pool<Sqlite>>,
    settings: &State<Settings>,
) -> Result<Json<CourseWithContentsResponse>, AppError> {
    let course = enrolled_course(db, &key, &user).await?;
    let ctx = RenderContext::new(settings.media_url.clone());

    let mut modules = Vec::new();
    for module in get_modules(db, course.id).await? {
        modules.push(module_with_contents(db, module, &ctx).await?);
    }

    Ok(Json(CourseWithContentsResponse {
        id: course.id,
        subject: course.subject_id,
        title: course.title,
        slug: course.slug,
        overview: course.overview,
        created: course.created,
        owner: course.owner_id,
        modules,
    }))
}

#[derive(Deserialize, Serialize, Validate)]
pub struct CreateModuleRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    title: String,
    #[serde(default)]
    description: String,
    #[validate(range(min = 0, message = "Order must be zero or greater"))]
    order: Option<i64>,
}

#[post("/courses/<key>/modules", data = "<request>")]
pub async fn api_create_module(
    key: Lookup,
    request: Json<CreateModuleRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<PlacedResponse>>, ApiError> {
    let validated = request.validate_custom()?;

    let course = get_course(db, &key).await.validate_custom()?;
    user.require_course_management(course.owner_id)
        .validate_custom()?;

    let placed = create_module(
        db,
        course.id,
        &validated.title,
        &validated.description,
        validated.order,
    )
    .await
    .validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(PlacedResponse {
            id: placed.id,
            order: placed.order,
        }),
    ))
}

#[delete("/modules/<id>")]
pub async fn api_delete_module(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, AppError> {
    let module = get_module(db, id).await?;
    let course = get_course(db, &Lookup::Id(module.course_id)).await?;
    user.require_course_management(course.owner_id)?;

    delete_module(db, module.id).await?;
    Ok(Status::NoContent)
}

#[derive(Deserialize, Serialize, Validate)]
pub struct CreateContentRequest {
    #[validate(range(min = 0, message = "Order must be zero or greater"))]
    order: Option<i64>,
    item: NewItem,
}

#[post("/modules/<id>/contents", data = "<request>")]
pub async fn api_create_content(
    id: i64,
    request: Json<CreateContentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<PlacedContentResponse>>, ApiError> {
    let validated = request.validate_custom()?;
    validated.item.validate().map_err(ValidationErrorWrapper)?;

    let module = get_module(db, id).await.validate_custom()?;
    let course = get_course(db, &Lookup::Id(module.course_id))
        .await
        .validate_custom()?;
    user.require_course_management(course.owner_id)
        .validate_custom()?;

    let placed = create_content(db, module.id, user.id, &validated.item, validated.order)
        .await
        .validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(PlacedContentResponse {
            id: placed.id,
            order: placed.order,
            kind: validated.item.kind().to_string(),
        }),
    ))
}

#[delete("/contents/<id>")]
pub async fn api_delete_content(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, AppError> {
    let owner_id = get_content_course_owner(db, id).await?;
    user.require_course_management(owner_id)?;

    delete_content(db, id).await?;
    Ok(Status::NoContent)
}

#[derive(Deserialize, Serialize, Validate)]
pub struct StudentRegistrationRequest {
    #[validate(length(min = 1, max = 150, message = "Username must be 1 to 150 characters"))]
    username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[serde(default)]
    #[validate(length(max = 150, message = "Display name must be at most 150 characters"))]
    display_name: String,
}

#[post("/students/register", data = "<registration>")]
pub async fn api_register_student(
    registration: Json<StudentRegistrationRequest>,
    db: &State<Pool<Sqlite>>,
    settings: &State<Settings>,
) -> Result<Custom<Json<UserData>>, ApiError> {
    let validated = registration.validate_custom()?;

    let existing_user = find_user_by_username(db, &validated.username)
        .await
        .validate_custom()?;

    if existing_user.is_some() {
        return Err(Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error(
                "username",
                "Username already exists",
            )),
        ));
    }

    let password_hash =
        hash_password(&validated.password, settings.password_hash_cost).validate_custom()?;
    let display_name = Some(validated.display_name.as_str()).filter(|name| !name.is_empty());

    let user_id = create_user(
        db,
        &validated.username,
        &password_hash,
        Role::Student,
        display_name,
    )
    .await
    .validate_custom()?;

    let user = get_user(db, user_id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(UserData::from(user))))
}

#[get("/students/courses")]
pub async fn api_student_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<CourseResponse>>, AppError> {
    let mut courses = Vec::new();
    for course in get_enrolled_courses(db, user.id).await? {
        courses.push(course_response(db, course).await?);
    }

    Ok(Json(courses))
}

#[get("/students/courses/<key>?<module>")]
pub async fn api_student_course_detail(
    key: Lookup,
    module: Option<i64>,
    user: User,
    db: &State<Pool<Sqlite>>,
    settings: &State<Settings>,
) -> Result<Json<StudentCourseDetailResponse>, AppError> {
    let course = enrolled_course(db, &key, &user).await?;
    let modules = get_modules(db, course.id).await?;

    let selected = match module {
        Some(module_id) => Some(
            modules
                .iter()
                .find(|m| m.id == module_id)
                .cloned()
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "Module {} not found in course {}",
                        module_id, course.slug
                    ))
                })?,
        ),
        None => modules.first().cloned(),
    };

    let ctx = RenderContext::new(settings.media_url.clone());
    let module = match selected {
        Some(selected) => Some(module_with_contents(db, selected, &ctx).await?),
        None => None,
    };

    Ok(Json(StudentCourseDetailResponse {
        id: course.id,
        title: course.title,
        slug: course.slug,
        overview: course.overview,
        modules: modules
            .into_iter()
            .map(|m| ModuleLink {
                id: m.id,
                order: m.order,
                title: m.title,
            })
            .collect(),
        module,
    }))
}

#[get("/courses/<key>/chat")]
pub async fn api_get_chat(
    key: Lookup,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Message>>, AppError> {
    let course = chat_course(db, &key, &user).await?;
    Ok(Json(get_messages(db, course.id).await?))
}

#[derive(Deserialize, Serialize, Validate)]
pub struct PostMessageRequest {
    #[validate(
        length(min = 1, max = 2000, message = "Message must be 1 to 2000 characters"),
        custom(function = "validate_not_blank")
    )]
    content: String,
}

#[post("/courses/<key>/chat", data = "<request>")]
pub async fn api_post_chat(
    key: Lookup,
    request: Json<PostMessageRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Message>>, ApiError> {
    user.require_permission(Permission::PostChatMessages)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let course = chat_course(db, &key, &user).await.validate_custom()?;
    let message = create_message(db, course.id, user.id, validated.content.trim())
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(message)))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
