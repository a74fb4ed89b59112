use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{Book, SearchFilters};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SuggestionRequest {
    #[schema(example = "space opera")]
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SuggestionResponse {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NaturalSearchRequest {
    #[schema(example = "highly rated fantasy by Ursula Le Guin that I can borrow today")]
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilterSource {
    Model,
    Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NaturalSearchResponse {
    pub filters: SearchFilters,
    pub source: FilterSource,
    pub results: Vec<Book>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AvatarRequest {
    #[serde(default)]
    #[schema(example = "watercolor, cozy library")]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AvatarResponse {
    pub avatar_url: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookSummary {
    pub book_id: String,
    pub summary: String,
    pub key_themes: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Recommendation {
    pub book: Book,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecommendationQuery {
    /// Number of books to return, 1 to 20 (default 5)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecommendationResponse {
    pub recommendations: Vec<Recommendation>,
    pub source: FilterSource,
}
