pub mod assistant;
pub mod avatar;
pub mod catalog;
pub mod catalog_tools;
pub mod chat_history;
pub mod library;
pub mod recommendation;
pub mod search_assistant;
pub mod summarizer;
pub mod users;

// Re-export public types
pub use assistant::AssistantService;
pub use avatar::AvatarService;
pub use catalog_tools::catalog_toolbox;
pub use chat_history::ChatSessionStore;
pub use library::{LibraryService, LibraryState, LoanPolicy};
pub use recommendation::RecommendationService;
pub use search_assistant::SearchAssistant;
pub use summarizer::BookSummarizer;
