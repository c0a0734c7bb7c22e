use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subject {
    pub id: i64,
    pub title: String,
    pub slug: String,
}

/// Subject row annotated with the number of courses filed under it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubjectSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub total_courses: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PopularCourse {
    pub title: String,
    pub total_students: i64,
}

impl fmt::Display for PopularCourse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.total_students)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub owner_id: i64,
    pub subject_id: i64,
    pub title: String,
    pub slug: String,
    pub overview: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Module {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: String,
    pub order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    File,
    Image,
    Video,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::File => "file",
            ItemKind::Image => "image",
            ItemKind::Video => "video",
        }
    }
}

impl FromStr for ItemKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ItemKind::Text),
            "file" => Ok(ItemKind::File),
            "image" => Ok(ItemKind::Image),
            "video" => Ok(ItemKind::Video),
            other => Err(AppError::Internal(format!("Unknown item kind: {}", other))),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields every content item carries regardless of its kind.
#[derive(Debug, Clone, Serialize)]
pub struct ItemBase {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Text {
    pub base: ItemBase,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct File {
    pub base: ItemBase,
    /// Path relative to the media root.
    pub file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub base: ItemBase,
    pub file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub base: ItemBase,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum Item {
    Text(Text),
    File(File),
    Image(Image),
    Video(Video),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Text(_) => ItemKind::Text,
            Item::File(_) => ItemKind::File,
            Item::Image(_) => ItemKind::Image,
            Item::Video(_) => ItemKind::Video,
        }
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbItem {
    pub id: i64,
    pub kind: String,
    pub owner_id: i64,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub content: Option<String>,
    pub file: Option<String>,
    pub url: Option<String>,
}

impl TryFrom<DbItem> for Item {
    type Error = AppError;

    fn try_from(row: DbItem) -> Result<Self, Self::Error> {
        let kind = ItemKind::from_str(&row.kind)?;
        let item_id = row.id;
        let missing = |column: &str| {
            AppError::Internal(format!("Item {} of kind {} has no {}", item_id, kind, column))
        };
        let base = ItemBase {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            created: row.created,
            updated: row.updated,
        };

        let item = match kind {
            ItemKind::Text => Item::Text(Text {
                content: row.content.ok_or_else(|| missing("content"))?,
                base,
            }),
            ItemKind::File => Item::File(File {
                file: row.file.ok_or_else(|| missing("file"))?,
                base,
            }),
            ItemKind::Image => Item::Image(Image {
                file: row.file.ok_or_else(|| missing("file"))?,
                base,
            }),
            ItemKind::Video => Item::Video(Video {
                url: row.url.ok_or_else(|| missing("url"))?,
                base,
            }),
        };

        Ok(item)
    }
}

/// A positioned slot in a module pointing at one item.
#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub id: i64,
    pub module_id: i64,
    pub order: i64,
    pub item: Item,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbContent {
    pub content_id: i64,
    pub module_id: i64,
    pub order: i64,
    #[sqlx(flatten)]
    pub item: DbItem,
}

impl TryFrom<DbContent> for Content {
    type Error = AppError;

    fn try_from(row: DbContent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.content_id,
            module_id: row.module_id,
            order: row.order,
            item: Item::try_from(row.item)?,
        })
    }
}

/// Payload for a new item, tagged by kind on the wire.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NewItem {
    Text { title: String, content: String },
    File { title: String, file: String },
    Image { title: String, file: String },
    Video { title: String, url: String },
}

impl NewItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            NewItem::Text { .. } => ItemKind::Text,
            NewItem::File { .. } => ItemKind::File,
            NewItem::Image { .. } => ItemKind::Image,
            NewItem::Video { .. } => ItemKind::Video,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            NewItem::Text { title, .. }
            | NewItem::File { title, .. }
            | NewItem::Image { title, .. }
            | NewItem::Video { title, .. } => title,
        }
    }
}

impl Validate for NewItem {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        let title = self.title().trim();
        if title.is_empty() || title.chars().count() > 250 {
            errors.add(
                "title",
                ValidationError::new("length")
                    .with_message("Title must be between 1 and 250 characters".into()),
            );
        }

        let (field, value) = match self {
            NewItem::Text { content, .. } => ("content", content),
            NewItem::File { file, .. } | NewItem::Image { file, .. } => ("file", file),
            NewItem::Video { url, .. } => ("url", url),
        };
        if value.trim().is_empty() {
            errors.add(
                field,
                ValidationError::new("required").with_message("This field is required".into()),
            );
        }
        if let NewItem::Video { url, .. } = self {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.add(
                    "url",
                    ValidationError::new("url").with_message("Enter a valid URL".into()),
                );
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub course_id: i64,
    pub content: String,
    pub sent_on: DateTime<Utc>,
}

/// Addresses a subject or course by numeric id or by slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(i64),
    Slug(String),
}

impl Lookup {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(id) => Lookup::Id(id),
            Err(_) => Lookup::Slug(raw.to_string()),
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Id(id) => write!(f, "{}", id),
            Lookup::Slug(slug) => f.write_str(slug),
        }
    }
}
