use rocket::FromForm;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 50;

#[derive(Debug, Default, FromForm)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// A validated page window over a collection of `count` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
    pub count: i64,
}

impl Page {
    /// Clamps the page size to `1..=MAX_PAGE_SIZE` and rejects page numbers
    /// outside the collection. Page 1 of an empty collection is valid.
    pub fn resolve(params: &PageParams, count: i64) -> Result<Self, AppError> {
        let size = params
            .page_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        let number = params.page.unwrap_or(1);

        let page = Self {
            number,
            size,
            count,
        };
        if number < 1 || number > page.last_page() {
            return Err(AppError::NotFound("Invalid page.".to_string()));
        }

        Ok(page)
    }

    pub fn last_page(&self) -> i64 {
        ((self.count + self.size - 1) / self.size).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.size
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.size
    }

    fn link(&self, base: &str, number: i64) -> String {
        format!("{}?page={}&page_size={}", base, number, self.size)
    }

    pub fn next(&self, base: &str) -> Option<String> {
        (self.number < self.last_page()).then(|| self.link(base, self.number + 1))
    }

    pub fn previous(&self, base: &str) -> Option<String> {
        (self.number > 1).then(|| self.link(base, self.number - 1))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(page: &Page, base: &str, results: Vec<T>) -> Self {
        Self {
            count: page.count,
            next: page.next(base),
            previous: page.previous(base),
            results,
        }
    }
}
