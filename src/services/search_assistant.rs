use crate::{
    error::{ApiError, Result},
    llm::{parse_json_output, ChatFlow, FlowRunner, PromptTemplate},
    models::{
        FilterSource, NaturalSearchRequest, NaturalSearchResponse, SearchFilters, SortOrder,
        SuggestionResponse,
    },
    services::LibraryService,
};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_SUGGESTIONS: usize = 5;
const MAX_QUERY_CHARS: usize = 300;
const DEFAULT_RESULT_LIMIT: usize = 20;

static AUTHOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:written\s+)?by\s+([a-z][a-z.'\-]*(?:\s+[a-z][a-z.'\-]*){0,3}?)(?:\s+(?:that|which|with|rated|available|published|from|before|after|since|in)\b|[,.;!?]|$)",
    )
    .unwrap()
});

static RATING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\brat(?:ed|ing)\s*(?:above|over|at\s+least|of)?\s*(?:>=?\s*)?([0-5](?:\.\d)?)")
        .unwrap()
});

static HIGHLY_RATED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:highly|top|well|best)[\s-]rated\b|\bbest\b").unwrap());

static AFTER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:after|since|from)\s+(\d{4})\b").unwrap());

static BEFORE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbefore\s+(\d{4})\b").unwrap());

static DECADE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:from\s+the\s+|the\s+)?(\d{3})0s\b").unwrap());

static AVAILABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:available(?:\s+now|\s+today)?|in\s+stock|(?:i\s+)?can\s+borrow(?:\s+now|\s+today)?|on\s+the\s+shelf)\b")
        .unwrap()
});

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "and", "or", "of", "for", "to", "me", "i", "some", "any", "find",
        "show", "give", "want", "looking", "look", "need", "books", "book", "novels", "novel",
        "about", "with", "that", "which", "is", "are", "please", "something", "recommend",
        "good", "great", "read", "reads", "stories", "story", "in", "on", "like",
    ]
    .into()
});

#[derive(Serialize)]
pub struct SuggestInput {
    pub query: String,
    pub genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestOutput {
    #[serde(default)]
    pub suggestions: Vec<String>,
}

pub struct SuggestSearchTerms;

impl ChatFlow for SuggestSearchTerms {
    type Input = SuggestInput;
    type Output = SuggestOutput;

    fn name(&self) -> &'static str {
        "suggest_search_terms"
    }

    fn system_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "You suggest search terms for a library catalog. Known genres: {{genres}}. \
             Reply with JSON: {\"suggestions\": [up to 5 short search strings]}.",
        )
    }

    fn user_template(&self) -> PromptTemplate {
        PromptTemplate::new("Partial search: {{query}}")
    }

    fn parse_output(&self, content: &str) -> Result<SuggestOutput> {
        parse_json_output(content)
    }
}

#[derive(Serialize)]
pub struct ParseQueryInput {
    pub query: String,
    pub genres: Vec<String>,
    pub current_year: i32,
}

pub struct ParseSearchQuery;

impl ChatFlow for ParseSearchQuery {
    type Input = ParseQueryInput;
    type Output = SearchFilters;

    fn name(&self) -> &'static str {
        "parse_search_query"
    }

    fn system_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "Turn a library search request into filters. The year is {{current_year}}. \
             Known genres: {{genres}}. Reply with JSON containing only these keys: \
             keywords, author, genre, min_rating (0-5), available_only (bool), \
             published_after, published_before. Use null for anything not asked for.",
        )
    }

    fn user_template(&self) -> PromptTemplate {
        PromptTemplate::new("{{query}}")
    }

    fn temperature(&self) -> Option<f32> {
        Some(0.0)
    }

    fn parse_output(&self, content: &str) -> Result<SearchFilters> {
        parse_json_output(content)
    }
}

/// Rule-based parse of a natural-language request, used when the model is unavailable.
pub fn rule_based_filters(query: &str, known_genres: &[String]) -> SearchFilters {
    let mut filters = SearchFilters::default();
    let mut consumed: Vec<(usize, usize)> = Vec::new();

    if let Some(cap) = AUTHOR_PATTERN.captures(query) {
        if let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) {
            filters.author = Some(name.as_str().trim().to_string());
            consumed.push((whole.start(), name.end()));
        }
    }

    if let Some(cap) = RATING_PATTERN.captures(query) {
        if let (Some(whole), Some(value)) = (cap.get(0), cap.get(1)) {
            filters.min_rating = value.as_str().parse().ok();
            consumed.push((whole.start(), whole.end()));
        }
    } else if let Some(m) = HIGHLY_RATED_PATTERN.find(query) {
        filters.min_rating = Some(4.0);
        consumed.push((m.start(), m.end()));
    }

    if let Some(m) = AVAILABLE_PATTERN.find(query) {
        filters.available_only = true;
        consumed.push((m.start(), m.end()));
    }

    if let Some(cap) = DECADE_PATTERN.captures(query) {
        if let (Some(whole), Some(prefix)) = (cap.get(0), cap.get(1)) {
            if let Ok(prefix) = prefix.as_str().parse::<i32>() {
                filters.published_after = Some(prefix * 10);
                filters.published_before = Some(prefix * 10 + 9);
                consumed.push((whole.start(), whole.end()));
            }
        }
    } else {
        for (pattern, after) in [(&*AFTER_PATTERN, true), (&*BEFORE_PATTERN, false)] {
            if let Some(cap) = pattern.captures(query) {
                if let (Some(whole), Some(year)) = (cap.get(0), cap.get(1)) {
                    let year = year.as_str().parse().ok();
                    if after {
                        filters.published_after = year;
                    } else {
                        filters.published_before = year;
                    }
                    consumed.push((whole.start(), whole.end()));
                }
            }
        }
    }

    // Longest genre first so "science fiction" wins over "fiction"
    let mut genres: Vec<&String> = known_genres.iter().collect();
    genres.sort_by_key(|g| std::cmp::Reverse(g.len()));
    for genre in genres {
        if let Some(span) = find_word(query, genre) {
            filters.genre = Some(genre.clone());
            consumed.push(span);
            break;
        }
    }

    let mut remainder = String::with_capacity(query.len());
    for (index, ch) in query.char_indices() {
        let inside = consumed.iter().any(|(s, e)| index >= *s && index < *e);
        remainder.push(if inside { ' ' } else { ch });
    }

    let keywords: Vec<String> = remainder
        .split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .map(|w| w.trim_matches(|c: char| c == '\'' || c == '-'))
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !STOPWORDS.contains(w.to_lowercase().as_str()))
        .map(str::to_string)
        .collect();
    if !keywords.is_empty() {
        filters.keywords = Some(keywords.join(" "));
    }

    filters.normalized()
}

/// Byte range of `word` in `text`, matched case-insensitively and bounded by
/// non-alphanumerics. Offsets refer to `text` itself.
fn find_word(text: &str, word: &str) -> Option<(usize, usize)> {
    if word.trim().is_empty() {
        return None;
    }
    let pattern = format!(
        r"(?i)(?:^|[^\p{{Alphabetic}}\p{{N}}])({})(?:$|[^\p{{Alphabetic}}\p{{N}}])",
        regex::escape(word)
    );
    let found = Regex::new(&pattern).ok()?.captures(text)?.get(1)?;
    Some((found.start(), found.end()))
}

pub struct SearchAssistant {
    runner: Arc<FlowRunner>,
    library: LibraryService,
}

impl SearchAssistant {
    pub fn new(runner: Arc<FlowRunner>, library: LibraryService) -> Self {
        Self { runner, library }
    }

    fn validate(query: &str) -> Result<&str> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::InvalidInput("Query cannot be empty".to_string()));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(ApiError::InvalidInput(format!(
                "Query is longer than {} characters",
                MAX_QUERY_CHARS
            )));
        }
        Ok(query)
    }

    pub async fn suggest(&self, query: &str) -> Result<SuggestionResponse> {
        let query = Self::validate(query)?;
        let input = SuggestInput {
            query: query.to_string(),
            genres: self.library.genres()?,
        };

        let output = self.runner.run(&SuggestSearchTerms, &input).await?;

        let mut seen = HashSet::new();
        let suggestions: Vec<String> = output
            .suggestions
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s.chars().count() <= MAX_QUERY_CHARS)
            .filter(|s| seen.insert(s.to_lowercase()))
            .take(MAX_SUGGESTIONS)
            .collect();

        debug!("{} suggestions for '{}'", suggestions.len(), query);
        Ok(SuggestionResponse { suggestions })
    }

    /// Model-parsed filters, falling back to [`rule_based_filters`] on any model failure.
    pub async fn parse(&self, query: &str) -> Result<(SearchFilters, FilterSource)> {
        let query = Self::validate(query)?;
        let genres = self.library.genres()?;
        let input = ParseQueryInput {
            query: query.to_string(),
            genres: genres.clone(),
            current_year: Utc::now().year(),
        };

        match self.runner.run(&ParseSearchQuery, &input).await {
            Ok(filters) => {
                let mut filters = filters.normalized();
                // Snap the genre to the catalog's spelling; drop genres the catalog lacks
                filters.genre = filters.genre.and_then(|g| {
                    genres.iter().find(|known| known.eq_ignore_ascii_case(&g)).cloned()
                });
                info!("Parsed search '{}' into {:?}", query, filters);
                Ok((filters, FilterSource::Model))
            }
            Err(e) => {
                warn!("Search parsing via model failed ({}), using rules", e);
                Ok((rule_based_filters(query, &genres), FilterSource::Rules))
            }
        }
    }

    pub async fn natural_search(
        &self,
        request: NaturalSearchRequest,
    ) -> Result<NaturalSearchResponse> {
        let (filters, source) = self.parse(&request.query).await?;
        let limit = request.limit.unwrap_or(DEFAULT_RESULT_LIMIT).clamp(1, 100);
        let page = self
            .library
            .list_books(&filters, SortOrder::Rating, Some(1), Some(limit))?;

        Ok(NaturalSearchResponse {
            filters,
            source,
            results: page.items,
            total: page.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::services::{catalog::tests::new_book, library::LoanPolicy};

    fn genres() -> Vec<String> {
        ["Fantasy", "Fiction", "Science Fiction", "Mystery"]
            .iter()
            .map(|g| g.to_string())
            .collect()
    }

    fn library() -> LibraryService {
        let library = LibraryService::new(LoanPolicy::default());
        library
            .add_book(new_book("A Wizard of Earthsea", "Ursula K. Le Guin", &["Fantasy"], 1))
            .unwrap();
        library
            .add_book(new_book("Dune", "Frank Herbert", &["Science Fiction"], 1))
            .unwrap();
        library
    }

    fn assistant(model: ScriptedModel) -> SearchAssistant {
        SearchAssistant::new(Arc::new(FlowRunner::new(Arc::new(model), 1)), library())
    }

    #[test]
    fn test_rules_extract_author_genre_and_availability() {
        let filters =
            rule_based_filters("fantasy books by Ursula Le Guin available now", &genres());

        assert_eq!(filters.author.as_deref(), Some("Ursula Le Guin"));
        assert_eq!(filters.genre.as_deref(), Some("Fantasy"));
        assert!(filters.available_only);
        assert_eq!(filters.keywords, None);
    }

    #[test]
    fn test_rules_prefer_longest_genre_and_rating() {
        let filters = rule_based_filters("highly rated science fiction about deserts", &genres());

        assert_eq!(filters.genre.as_deref(), Some("Science Fiction"));
        assert_eq!(filters.min_rating, Some(4.0));
        assert_eq!(filters.keywords.as_deref(), Some("deserts"));
    }

    #[test]
    fn test_rules_years() {
        let filters = rule_based_filters("mystery novels from the 1990s", &genres());
        assert_eq!(filters.genre.as_deref(), Some("Mystery"));
        assert_eq!(filters.published_after, Some(1990));
        assert_eq!(filters.published_before, Some(1999));

        let filters = rule_based_filters("books rated above 3.5 published after 2001", &genres());
        assert_eq!(filters.min_rating, Some(3.5));
        assert_eq!(filters.published_after, Some(2001));
    }

    #[test]
    fn test_genre_needs_word_boundary() {
        assert_eq!(find_word("nonfiction picks", "fiction"), None);
        assert_eq!(find_word("dark Fiction", "fiction"), Some((5, 12)));
    }

    #[test]
    fn test_genre_span_survives_case_changing_letters() {
        // "İ" grows by a byte when lowercased
        let query = "İZMİR İSTANBUL İNCİ fantasy";
        assert_eq!(find_word(query, "Fantasy"), Some((25, 32)));

        let filters = rule_based_filters(query, &genres());
        assert_eq!(filters.genre.as_deref(), Some("Fantasy"));
        assert_eq!(filters.keywords.as_deref(), Some("İZMİR İSTANBUL İNCİ"));
    }

    #[tokio::test]
    async fn test_suggestions_deduplicated_and_capped() {
        let assistant = assistant(ScriptedModel::text(&[
            r#"{"suggestions": ["Dune", "dune", " ", "space opera", "a", "b", "c", "d"]}"#,
        ]));

        let response = assistant.suggest("dun").await.unwrap();
        assert_eq!(response.suggestions, vec!["Dune", "space opera", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_parse_snaps_genre_to_catalog() {
        let assistant = assistant(ScriptedModel::text(&[
            r#"{"genre": "fantasy", "author": "", "min_rating": null, "available_only": true}"#,
        ]));

        let (filters, source) = assistant.parse("fantasy I can borrow").await.unwrap();
        assert_eq!(source, FilterSource::Model);
        assert_eq!(filters.genre.as_deref(), Some("Fantasy"));
        assert_eq!(filters.author, None);
        assert!(filters.available_only);
    }

    #[tokio::test]
    async fn test_natural_search_falls_back_to_rules() {
        let assistant = assistant(ScriptedModel::failing());

        let response = assistant
            .natural_search(NaturalSearchRequest {
                query: "books by Frank Herbert".to_string(),
                limit: None,
            })
            .await
            .unwrap();

        assert_eq!(response.source, FilterSource::Rules);
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].title, "Dune");
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let assistant = assistant(ScriptedModel::text(&[]));
        assert!(matches!(
            assistant.suggest("   ").await,
            Err(ApiError::InvalidInput(_))
        ));
    }
}
