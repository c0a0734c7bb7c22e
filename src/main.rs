#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod db;
mod env;
mod error;
mod models;
mod ordering;
mod pagination;
mod render;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::sync::Arc;

use api::{
    api_course_contents, api_create_content, api_create_course, api_create_module,
    api_create_subject, api_delete_content, api_delete_course, api_delete_module, api_enroll,
    api_get_chat, api_get_course, api_get_subject, api_list_courses, api_list_subjects,
    api_post_chat, api_register_student, api_student_course_detail, api_student_courses, health,
};
use auth::{DatabaseIdentity, SharedIdentityProvider, forbidden_api, unauthorized_api};
use env::{Settings, load_environment};
use error::AppError;
use rocket::{Build, Rocket};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;

use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    load_environment().map_err(|e| anyhow::anyhow!("Failed to load environment: {}", e))?;
    let settings = Settings::from_env()?;
    init_tracing(&settings)?;

    let pool = SqlitePool::connect(&settings.database_url).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;
    info!("Migrations completed successfully");

    init_rocket(pool, settings).await.launch().await?;
    Ok(())
}

pub async fn init_rocket(pool: SqlitePool, settings: Settings) -> Rocket<Build> {
    info!("Starting educa");

    let identity: SharedIdentityProvider = Arc::new(DatabaseIdentity::new(pool.clone()));

    rocket::build()
        .manage(pool)
        .manage(settings)
        .manage(identity)
        .mount(
            "/api",
            routes![
                api_list_subjects,
                api_get_subject,
                api_create_subject,
                api_list_courses,
                api_get_course,
                api_create_course,
                api_delete_course,
                api_enroll,
                api_course_contents,
                api_create_module,
                api_delete_module,
                api_create_content,
                api_delete_content,
                api_register_student,
                api_student_courses,
                api_student_course_detail,
                api_get_chat,
                api_post_chat,
            ],
        )
        .register("/api", catchers![unauthorized_api, forbidden_api])
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
