use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

fn deserialize_genres<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    let genres: Vec<String> = match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => s.split(',').map(|s| s.trim().to_string()).collect(),
        StringOrVec::Vec(v) => v.into_iter().map(|s| s.trim().to_string()).collect(),
    };

    Ok(genres.into_iter().filter(|g: &String| !g.is_empty()).collect())
}

fn deserialize_optional_genres<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_genres")] Vec<String>);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

fn deserialize_optional_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i32),
        Null,
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                i32::from_str(s.trim())
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
        }
        StringOrInt::Int(i) => Ok(Some(i)),
        StringOrInt::Null => Ok(None),
    }
}

fn default_copies() -> u32 {
    1
}

/// A catalog entry with its circulation counters and review aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Book {
    #[schema(example = "3f2b8c1e-6d0a-4a7e-9a43-2f8d8b1d2c10")]
    pub id: String,
    #[schema(example = "The Hobbit")]
    pub title: String,
    #[schema(example = "J.R.R. Tolkien")]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_genres")]
    #[schema(example = json!(["Fantasy", "Adventure"]))]
    pub genres: Vec<String>,
    #[serde(default, alias = "thumbnail", alias = "image_url")]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(
        default,
        alias = "publishedYear",
        deserialize_with = "deserialize_optional_i32"
    )]
    pub published_year: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_optional_i32")]
    pub page_count: Option<i32>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_copies")]
    pub total_copies: u32,
    #[serde(default = "default_copies")]
    pub available_copies: u32,
    /// Running average of all review ratings, 0 when unreviewed.
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn from_new(input: NewBook) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            author: input.author.trim().to_string(),
            description: input.description,
            genres: input.genres,
            cover_image: input.cover_image,
            isbn: input.isbn,
            published_year: input.published_year,
            page_count: input.page_count,
            publisher: input.publisher,
            language: input.language,
            total_copies: input.total_copies,
            available_copies: input.total_copies,
            rating: 0.0,
            review_count: 0,
            reviews: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn copies_on_loan(&self) -> u32 {
        self.total_copies.saturating_sub(self.available_copies)
    }

    pub fn is_available(&self) -> bool {
        self.available_copies > 0
    }

    pub fn has_genre(&self, genre: &str) -> bool {
        self.genres.iter().any(|g| g.eq_ignore_ascii_case(genre))
    }

    /// Folds one new rating into the stored average.
    pub fn apply_review(&mut self, review: Review) {
        let count = self.review_count as f32;
        self.rating = (self.rating * count + f32::from(review.rating)) / (count + 1.0);
        self.review_count += 1;
        self.reviews.push(review);
        self.updated_at = Utc::now();
    }
}

/// Payload for adding a book to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_genres")]
    pub genres: Vec<String>,
    #[serde(default, alias = "thumbnail")]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_i32")]
    pub published_year: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_optional_i32")]
    pub page_count: Option<i32>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_copies")]
    pub total_copies: u32,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_genres")]
    pub genres: Option<Vec<String>>,
    pub cover_image: Option<String>,
    pub isbn: Option<String>,
    pub published_year: Option<i32>,
    pub page_count: Option<i32>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub total_copies: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Review {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    /// 1 to 5 stars.
    #[schema(example = 4, minimum = 1, maximum = 5)]
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReview {
    #[schema(example = 5, minimum = 1, maximum = 5)]
    pub rating: u8,
    #[serde(default)]
    #[schema(example = "Couldn't put it down.")]
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review(rating: u8) -> Review {
        Review {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            user_name: "Reader".to_string(),
            rating,
            comment: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_genres_accept_comma_separated_string() {
        let book: NewBook = serde_json::from_value(json!({
            "title": "Dune",
            "author": "Frank Herbert",
            "genres": "Science Fiction, Classics,",
        }))
        .unwrap();

        assert_eq!(book.genres, vec!["Science Fiction", "Classics"]);
        assert_eq!(book.total_copies, 1);
    }

    #[test]
    fn test_published_year_from_string() {
        let book: NewBook = serde_json::from_value(json!({
            "title": "Dune",
            "author": "Frank Herbert",
            "published_year": "1965",
            "page_count": "",
        }))
        .unwrap();

        assert_eq!(book.published_year, Some(1965));
        assert_eq!(book.page_count, None);
    }

    #[test]
    fn test_review_aggregate_is_running_average() {
        let mut book = Book::from_new(NewBook {
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            description: String::new(),
            genres: vec![],
            cover_image: None,
            isbn: None,
            published_year: None,
            page_count: None,
            publisher: None,
            language: None,
            total_copies: 2,
        });

        book.apply_review(review(5));
        book.apply_review(review(4));
        book.apply_review(review(3));

        assert_eq!(book.review_count, 3);
        assert!((book.rating - 4.0).abs() < f32::EPSILON);
        assert_eq!(book.reviews.len(), 3);
        assert_eq!(book.available_copies, 2);
    }
}
