use crate::{
    error::{ApiError, Result},
    llm::{Tool, ToolBox},
    models::{Book, SearchFilters, SortOrder},
    services::LibraryService,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_RESULTS: usize = 5;
const MAX_RESULTS: usize = 10;

/// The catalog tools offered to the chat assistant.
pub fn catalog_toolbox(library: LibraryService) -> ToolBox {
    ToolBox::new()
        .with(SearchCatalog {
            library: library.clone(),
        })
        .with(BookDetails {
            library: library.clone(),
        })
        .with(ListGenres { library })
}

fn book_brief(book: &Book) -> Value {
    json!({
        "id": book.id,
        "title": book.title,
        "author": book.author,
        "genres": book.genres,
        "rating": (book.rating * 10.0).round() / 10.0,
        "review_count": book.review_count,
        "available_copies": book.available_copies,
        "published_year": book.published_year,
    })
}

pub struct SearchCatalog {
    library: LibraryService,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default)]
    available_only: bool,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for SearchCatalog {
    fn name(&self) -> &'static str {
        "search_catalog"
    }

    fn description(&self) -> &'static str {
        "Search the library catalog by keywords, author or genre. Returns brief book records."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Keywords matched against title, author and description"},
                "author": {"type": "string"},
                "genre": {"type": "string"},
                "available_only": {"type": "boolean"},
                "limit": {"type": "integer", "minimum": 1, "maximum": MAX_RESULTS}
            }
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|e| ApiError::InvalidInput(format!("search_catalog arguments: {}", e)))?;

        let filters = SearchFilters {
            keywords: args.query,
            author: args.author,
            genre: args.genre,
            available_only: args.available_only,
            ..SearchFilters::default()
        }
        .normalized();
        let limit = args.limit.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS);

        let page = self
            .library
            .list_books(&filters, SortOrder::Rating, Some(1), Some(limit))?;

        Ok(json!({
            "total_matches": page.total,
            "books": page.items.iter().map(book_brief).collect::<Vec<_>>(),
        }))
    }
}

pub struct BookDetails {
    library: LibraryService,
}

#[derive(Debug, Deserialize)]
struct BookDetailsArgs {
    book_id: String,
}

#[async_trait]
impl Tool for BookDetails {
    fn name(&self) -> &'static str {
        "get_book_details"
    }

    fn description(&self) -> &'static str {
        "Fetch the full record of one book, including its description and recent reviews."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "book_id": {"type": "string"}
            },
            "required": ["book_id"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: BookDetailsArgs = serde_json::from_value(arguments)
            .map_err(|e| ApiError::InvalidInput(format!("get_book_details arguments: {}", e)))?;
        let book = self.library.get_book(&args.book_id)?;

        let mut details = book_brief(&book);
        details["description"] = json!(book.description);
        details["total_copies"] = json!(book.total_copies);
        details["recent_reviews"] = json!(book
            .reviews
            .iter()
            .rev()
            .take(3)
            .map(|r| json!({"rating": r.rating, "comment": r.comment}))
            .collect::<Vec<_>>());
        Ok(details)
    }
}

pub struct ListGenres {
    library: LibraryService,
}

#[async_trait]
impl Tool for ListGenres {
    fn name(&self) -> &'static str {
        "list_genres"
    }

    fn description(&self) -> &'static str {
        "List every genre present in the catalog."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _arguments: Value) -> Result<Value> {
        Ok(json!({ "genres": self.library.genres()? }))
    }
}
