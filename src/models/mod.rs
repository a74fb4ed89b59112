use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use assist::{
    AvatarRequest, AvatarResponse, BookSummary, FilterSource, NaturalSearchRequest,
    NaturalSearchResponse, Recommendation, RecommendationQuery, RecommendationResponse,
    SuggestionRequest, SuggestionResponse,
};
pub use book::{Book, BookUpdate, NewBook, NewReview, Review};
pub use chat::{ChatHistoryResponse, ChatMessage, ChatRequest, ChatResponse, ChatRole};
pub use search::{BookPage, BookQuery, SearchFilters, SortOrder};
pub use user::{
    BorrowRecord, BorrowStatus, Dashboard, DashboardCounts, LibraryStats, LoanView, NewUser,
    OverdueLoan, ProfileUpdate, RoleUpdate, UserProfile, UserRole,
};

mod assist;
mod book;
mod chat;
mod search;
mod user;

/// Health check response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Status of the service
    #[schema(example = "ok")]
    pub status: String,
    /// Current timestamp in RFC3339 format
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub timestamp: String,
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    #[schema(example = "Not found: Book 42 not found")]
    pub error: String,
}
