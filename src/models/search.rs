use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::Book;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Title,
    Rating,
    Newest,
    Popular,
}

/// Structured catalog filters, either from query parameters or parsed from
/// a natural-language request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchFilters {
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub min_rating: Option<f32>,
    #[serde(default)]
    pub available_only: bool,
    #[serde(default)]
    pub published_after: Option<i32>,
    #[serde(default)]
    pub published_before: Option<i32>,
}

impl SearchFilters {
    /// Drops blank strings and out-of-range numbers so model output can be used as-is.
    pub fn normalized(mut self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        self.keywords = clean(self.keywords);
        self.author = clean(self.author);
        self.genre = clean(self.genre);
        self.min_rating = self
            .min_rating
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(0.0, 5.0))
            .filter(|r| *r > 0.0);
        if let (Some(after), Some(before)) = (self.published_after, self.published_before) {
            if after > before {
                self.published_after = Some(before);
                self.published_before = Some(after);
            }
        }
        self
    }
}

/// Query string accepted by `GET /api/books`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    /// Free text matched against title, author and description
    pub q: Option<String>,
    pub genre: Option<String>,
    pub author: Option<String>,
    pub min_rating: Option<f32>,
    #[serde(default)]
    pub available: bool,
    pub published_after: Option<i32>,
    pub published_before: Option<i32>,
    #[serde(default)]
    pub sort: SortOrder,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl BookQuery {
    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            keywords: self.q.clone(),
            author: self.author.clone(),
            genre: self.genre.clone(),
            min_rating: self.min_rating,
            available_only: self.available,
            published_after: self.published_after,
            published_before: self.published_before,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookPage {
    pub items: Vec<Book>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}
