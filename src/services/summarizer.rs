use crate::{
    error::{ApiError, Result},
    llm::{parse_json_output, ChatFlow, FlowRunner, PromptTemplate},
    models::{Book, BookSummary},
    services::LibraryService,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const MAX_REVIEW_EXCERPTS: usize = 5;
const MAX_EXCERPT_CHARS: usize = 280;
const MAX_THEMES: usize = 6;
const CACHE_CLEANUP_THRESHOLD: usize = 5000;

#[derive(Serialize)]
pub struct SummaryInput {
    pub title: String,
    pub author: String,
    pub description: String,
    pub genres: Vec<String>,
    pub review_excerpts: Vec<String>,
}

impl SummaryInput {
    fn from_book(book: &Book) -> Self {
        Self {
            title: book.title.clone(),
            author: book.author.clone(),
            description: book.description.clone(),
            genres: book.genres.clone(),
            review_excerpts: book
                .reviews
                .iter()
                .rev()
                .filter(|r| !r.comment.is_empty())
                .take(MAX_REVIEW_EXCERPTS)
                .map(|r| r.comment.chars().take(MAX_EXCERPT_CHARS).collect())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
    #[serde(default)]
    pub key_themes: Vec<String>,
}

pub struct SummarizeBook;

impl ChatFlow for SummarizeBook {
    type Input = SummaryInput;
    type Output = SummaryOutput;

    fn name(&self) -> &'static str {
        "summarize_book"
    }

    fn system_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "You write spoiler-free summaries of library books. Reply with JSON: \
             {\"summary\": \"two or three sentences\", \"key_themes\": [\"...\"]}.",
        )
    }

    fn user_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "Title: {{title}}\nAuthor: {{author}}\nGenres: {{genres}}\n\
             Description: {{description}}\nReader comments: {{review_excerpts}}",
        )
    }

    fn parse_output(&self, content: &str) -> Result<SummaryOutput> {
        parse_json_output(content)
    }
}

struct SummaryCacheEntry {
    summary: BookSummary,
    timestamp: Instant,
}

/// Book summaries, cached per book until the TTL lapses or a new review arrives.
pub struct BookSummarizer {
    runner: Arc<FlowRunner>,
    library: LibraryService,
    cache: Arc<RwLock<HashMap<String, SummaryCacheEntry>>>,
    cache_ttl: Duration,
}

impl BookSummarizer {
    pub fn new(runner: Arc<FlowRunner>, library: LibraryService, cache_ttl_seconds: u64) -> Self {
        Self {
            runner,
            library,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
        }
    }

    fn cache_key(book: &Book) -> String {
        format!("{}:{}", book.id, book.review_count)
    }

    pub async fn summarize(&self, book_id: &str) -> Result<BookSummary> {
        let book = self.library.get_book(book_id)?;
        let cache_key = Self::cache_key(&book);

        if let Ok(cache) = self.cache.read() {
            if let Some(entry) = cache.get(&cache_key) {
                if entry.timestamp.elapsed() < self.cache_ttl {
                    debug!("Cache HIT for summary: {}", cache_key);
                    return Ok(entry.summary.clone());
                }
            }
        }

        debug!("Cache MISS for summary: {}", cache_key);
        let output = self
            .runner
            .run(&SummarizeBook, &SummaryInput::from_book(&book))
            .await?;

        let summary_text = output.summary.trim().to_string();
        if summary_text.is_empty() {
            return Err(ApiError::ExternalServiceError(
                "Model returned an empty summary".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let key_themes = output
            .key_themes
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .take(MAX_THEMES)
            .collect();

        let summary = BookSummary {
            book_id: book.id.clone(),
            summary: summary_text,
            key_themes,
            generated_at: Utc::now(),
        };

        if let Ok(mut cache) = self.cache.write() {
            // Older review counts for this book are stale now
            let prefix = format!("{}:", book.id);
            cache.retain(|key, _| !key.starts_with(&prefix));
            cache.insert(
                cache_key,
                SummaryCacheEntry {
                    summary: summary.clone(),
                    timestamp: Instant::now(),
                },
            );

            if cache.len() > CACHE_CLEANUP_THRESHOLD {
                self.cleanup_cache(&mut cache);
            }
        }

        info!("Generated summary for book {}", book.id);
        Ok(summary)
    }

    fn cleanup_cache(&self, cache: &mut HashMap<String, SummaryCacheEntry>) {
        cache.retain(|_, entry| entry.timestamp.elapsed() < self.cache_ttl);
        info!("Cleaned up summary cache, remaining entries: {}", cache.len());
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
            info!("Summary cache cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::{NewReview, NewUser};
    use crate::services::{catalog::tests::new_book, library::LoanPolicy};

    const REPLY: &str = r#"{"summary": " A desert planet. ", "key_themes": ["Ecology", "ecology", "Power"]}"#;

    fn setup(replies: &[&str]) -> (BookSummarizer, Arc<ScriptedModel>, LibraryService, String) {
        let library = LibraryService::new(LoanPolicy::default());
        let book_id = library
            .add_book(new_book("Dune", "Frank Herbert", &["Science Fiction"], 1))
            .unwrap()
            .id;
        let model = Arc::new(ScriptedModel::text(replies));
        let summarizer = BookSummarizer::new(
            Arc::new(FlowRunner::new(model.clone(), 1)),
            library.clone(),
            3600,
        );
        (summarizer, model, library, book_id)
    }

    #[tokio::test]
    async fn test_summary_is_cleaned_and_cached() {
        let (summarizer, model, _, book_id) = setup(&[REPLY]);

        let first = summarizer.summarize(&book_id).await.unwrap();
        assert_eq!(first.summary, "A desert planet.");
        assert_eq!(first.key_themes, vec!["Ecology", "Power"]);

        let second = summarizer.summarize(&book_id).await.unwrap();
        assert_eq!(second.generated_at, first.generated_at);
        assert_eq!(model.request_count(), 1);
    }

    #[tokio::test]
    async fn test_new_review_invalidates_cache() {
        let (summarizer, model, library, book_id) = setup(&[REPLY, REPLY]);
        summarizer.summarize(&book_id).await.unwrap();

        let user = library
            .register_user(NewUser {
                name: "Ada".to_string(),
                email: "ada@example.org".to_string(),
            })
            .unwrap()
            .id;
        library.borrow(&user, &book_id).unwrap();
        library
            .review(
                &user,
                &book_id,
                NewReview {
                    rating: 5,
                    comment: "Loved the sandworms".to_string(),
                },
            )
            .unwrap();

        summarizer.summarize(&book_id).await.unwrap();
        assert_eq!(model.request_count(), 2);

        let requests = model.requests.lock().unwrap();
        let prompt = format!("{:?}", requests[1].messages[1]);
        assert!(prompt.contains("Loved the sandworms"));
    }

    #[tokio::test]
    async fn test_unknown_book() {
        let (summarizer, model, _, _) = setup(&[]);
        assert!(matches!(
            summarizer.summarize("missing").await,
            Err(ApiError::NotFound(_))
        ));
        assert_eq!(model.request_count(), 0);
    }
}
