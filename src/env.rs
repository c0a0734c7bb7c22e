use std::path::Path;

use anyhow::{Context, bail};
use tracing::{info, warn};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://educa.db?mode=rwc";
pub const DEFAULT_MEDIA_URL: &str = "/media/";

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Runtime settings read from the process environment once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    /// Public prefix for stored file and image paths. Always ends in `/`.
    pub media_url: String,
    pub password_hash_cost: u32,
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: Vec<(String, String)>,
    pub environment: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            media_url: DEFAULT_MEDIA_URL.to_string(),
            password_hash_cost: bcrypt::DEFAULT_COST,
            otlp_endpoint: None,
            otlp_headers: Vec::new(),
            environment: "development".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Settings::default();

        let password_hash_cost = match non_empty_var("PASSWORD_HASH_COST") {
            Some(raw) => {
                let cost: u32 = raw
                    .parse()
                    .with_context(|| format!("PASSWORD_HASH_COST is not a number: {raw}"))?;
                if !(4..=31).contains(&cost) {
                    bail!("PASSWORD_HASH_COST must be between 4 and 31, got {cost}");
                }
                cost
            }
            None => defaults.password_hash_cost,
        };

        let otlp_headers = match non_empty_var("OTEL_EXPORTER_OTLP_HEADERS") {
            Some(raw) => parse_headers(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            database_url: non_empty_var("DATABASE_URL").unwrap_or(defaults.database_url),
            media_url: normalize_media_url(
                &non_empty_var("MEDIA_URL").unwrap_or(defaults.media_url),
            ),
            password_hash_cost,
            otlp_endpoint: non_empty_var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            otlp_headers,
            environment: non_empty_var("DEPLOYMENT_ENVIRONMENT").unwrap_or(defaults.environment),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    dotenvy::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_media_url(raw: &str) -> String {
    if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    }
}

fn parse_headers(raw: &str) -> anyhow::Result<Vec<(String, String)>> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_lowercase(), value.trim().to_string()))
            }
            _ => bail!("Malformed OTEL_EXPORTER_OTLP_HEADERS entry: {pair}"),
        })
        .collect()
}
