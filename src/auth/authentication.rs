use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rocket::Request;
use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::db::find_user_credentials;
use crate::error::AppError;

use super::User;

pub const REALM: &str = "educa";

/// Resolves credentials to a user. The service never manages sessions
/// itself; every request is checked against the provider.
#[rocket::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str)
    -> Result<Option<User>, AppError>;
}

pub type SharedIdentityProvider = Arc<dyn IdentityProvider>;

/// Checks bcrypt hashes stored in the `users` table.
pub struct DatabaseIdentity {
    pool: SqlitePool,
}

impl DatabaseIdentity {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl IdentityProvider for DatabaseIdentity {
    #[instrument(skip_all, fields(username))]
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        let Some((user, hash)) = find_user_credentials(&self.pool, username).await? else {
            return Ok(None);
        };

        let password = password.to_string();
        let valid = rocket::tokio::task::spawn_blocking(move || {
            bcrypt::verify(password, &hash).unwrap_or(false)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;

        Ok(valid.then_some(user))
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    Ok(bcrypt::hash(password, cost)?)
}

#[derive(Debug, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    /// Parses the value of an `Authorization: Basic ...` header.
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, encoded) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        if username.is_empty() {
            return None;
        }

        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn encode(username: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let Some(header) = request.headers().get_one("Authorization") else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let Some(credentials) = BasicCredentials::parse(header) else {
            tracing::warn!("Malformed Authorization header");
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let provider = match request.rocket().state::<SharedIdentityProvider>() {
            Some(provider) => provider,
            _ => {
                tracing::error!("Identity provider not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        match provider
            .authenticate(&credentials.username, &credentials.password)
            .await
        {
            Ok(Some(user)) => {
                tracing::info!(username = %user.username, role = %user.role.as_str(), "User authenticated");
                Outcome::Success(user)
            }
            Ok(None) => {
                tracing::warn!(username = %credentials.username, "Invalid credentials");
                Outcome::Error((Status::Unauthorized, ()))
            }
            Err(err) => {
                err.log_and_record("Identity provider");
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

#[derive(Responder)]
#[response(status = 401, content_type = "json")]
pub struct BasicChallenge {
    body: Json<Value>,
    challenge: Header<'static>,
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> BasicChallenge {
    BasicChallenge {
        body: Json(json!({
            "error": "Unauthorized",
            "message": "Authentication required"
        })),
        challenge: Header::new("WWW-Authenticate", format!("Basic realm=\"{}\"", REALM)),
    }
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Json<Value> {
    tracing::warn!("Forbidden access attempt");
    Json(json!({
        "error": "Forbidden",
        "message": "You don't have permission to perform this action"
    }))
}
