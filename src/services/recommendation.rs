use crate::{
    error::Result,
    llm::{parse_json_output, ChatFlow, FlowRunner, PromptTemplate},
    models::{Book, FilterSource, Recommendation, RecommendationResponse},
    services::LibraryService,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;
const MAX_CANDIDATES: usize = 30;

#[derive(Serialize)]
pub struct BorrowedBook {
    pub title: String,
    pub author: String,
    pub genres: Vec<String>,
}

#[derive(Serialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub author: String,
    pub genres: Vec<String>,
    pub rating: f32,
}

#[derive(Serialize)]
pub struct RecommendInput {
    pub borrowed: Vec<BorrowedBook>,
    pub candidates: Vec<Candidate>,
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct Pick {
    pub book_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RecommendOutput {
    #[serde(default)]
    pub recommendations: Vec<Pick>,
}

pub struct RecommendBooks;

impl ChatFlow for RecommendBooks {
    type Input = RecommendInput;
    type Output = RecommendOutput;

    fn name(&self) -> &'static str {
        "recommend_books"
    }

    fn system_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "You recommend library books. Pick at most {{limit}} books from the candidate \
             list only, using the ids given. Reply with JSON: {\"recommendations\": \
             [{\"book_id\": \"...\", \"reason\": \"one sentence\"}]}.",
        )
    }

    fn user_template(&self) -> PromptTemplate {
        PromptTemplate::new("Reading history: {{borrowed}}\nCandidates: {{candidates}}")
    }

    fn parse_output(&self, content: &str) -> Result<RecommendOutput> {
        parse_json_output(content)
    }
}

/// Genre weights from the books a user has borrowed, lowercased.
fn genre_profile(history: &[Book]) -> HashMap<String, usize> {
    let mut weights = HashMap::new();
    for genre in history.iter().flat_map(|b| &b.genres) {
        *weights.entry(genre.to_lowercase()).or_insert(0) += 1;
    }
    weights
}

fn genre_overlap(book: &Book, weights: &HashMap<String, usize>) -> usize {
    book.genres
        .iter()
        .filter_map(|g| weights.get(&g.to_lowercase()))
        .sum()
}

/// Genre overlap first, then rating, then title.
fn fallback_order(a: &Book, b: &Book, weights: &HashMap<String, usize>) -> Ordering {
    genre_overlap(b, weights)
        .cmp(&genre_overlap(a, weights))
        .then_with(|| b.rating.total_cmp(&a.rating))
        .then_with(|| a.title.cmp(&b.title))
}

fn fallback_reason(book: &Book, weights: &HashMap<String, usize>) -> String {
    book.genres
        .iter()
        .filter(|g| weights.contains_key(&g.to_lowercase()))
        .max_by_key(|g| weights.get(&g.to_lowercase()).copied().unwrap_or(0))
        .map(|g| format!("Because you enjoyed {} books", g))
        .unwrap_or_else(|| "Highly rated in the catalog".to_string())
}

pub struct RecommendationService {
    runner: Arc<FlowRunner>,
    library: LibraryService,
}

impl RecommendationService {
    pub fn new(runner: Arc<FlowRunner>, library: LibraryService) -> Self {
        Self { runner, library }
    }

    pub async fn recommend(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<RecommendationResponse> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let user = self.library.get_user(user_id)?;

        let (history, mut candidates) = self.library.inspect(|state| {
            let history: Vec<Book> = state
                .catalog
                .iter()
                .filter(|b| user.has_borrowed(&b.id))
                .cloned()
                .collect();
            let candidates: Vec<Book> = state
                .catalog
                .iter()
                .filter(|b| b.is_available() && !user.has_borrowed(&b.id))
                .cloned()
                .collect();
            (history, candidates)
        })?;

        if candidates.is_empty() {
            debug!("No recommendation candidates for user {}", user_id);
            return Ok(RecommendationResponse {
                recommendations: Vec::new(),
                source: FilterSource::Rules,
            });
        }

        let weights = genre_profile(&history);
        candidates.sort_by(|a, b| fallback_order(a, b, &weights));
        candidates.truncate(MAX_CANDIDATES);

        let input = RecommendInput {
            borrowed: history
                .iter()
                .map(|b| BorrowedBook {
                    title: b.title.clone(),
                    author: b.author.clone(),
                    genres: b.genres.clone(),
                })
                .collect(),
            candidates: candidates
                .iter()
                .map(|b| Candidate {
                    id: b.id.clone(),
                    title: b.title.clone(),
                    author: b.author.clone(),
                    genres: b.genres.clone(),
                    rating: (b.rating * 10.0).round() / 10.0,
                })
                .collect(),
            limit,
        };

        match self.runner.run(&RecommendBooks, &input).await {
            Ok(output) => {
                let picks = Self::resolve_picks(output.recommendations, &candidates, limit);
                if !picks.is_empty() {
                    info!("Model recommended {} books for user {}", picks.len(), user_id);
                    return Ok(RecommendationResponse {
                        recommendations: picks,
                        source: FilterSource::Model,
                    });
                }
                warn!("Model recommendations for user {} were unusable", user_id);
            }
            Err(e) => warn!("Recommendation model failed, using genre ranking: {}", e),
        }

        let recommendations = candidates
            .into_iter()
            .take(limit)
            .map(|book| Recommendation {
                reason: fallback_reason(&book, &weights),
                book,
            })
            .collect();

        Ok(RecommendationResponse {
            recommendations,
            source: FilterSource::Rules,
        })
    }

    /// Keeps picks that name a candidate, once each, in the model's order.
    fn resolve_picks(picks: Vec<Pick>, candidates: &[Book], limit: usize) -> Vec<Recommendation> {
        let by_id: HashMap<&str, &Book> = candidates.iter().map(|b| (b.id.as_str(), b)).collect();
        let mut seen = HashSet::new();

        picks
            .into_iter()
            .filter_map(|pick| {
                let book = by_id.get(pick.book_id.trim())?;
                if !seen.insert(book.id.clone()) {
                    return None;
                }
                let reason = match pick.reason.trim() {
                    "" => "Recommended for you".to_string(),
                    reason => reason.to_string(),
                };
                Some(Recommendation {
                    book: (*book).clone(),
                    reason,
                })
            })
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::{NewReview, NewUser};
    use crate::services::{catalog::tests::new_book, library::LoanPolicy};

    struct Fixture {
        library: LibraryService,
        user: String,
        dune: String,
        hyperion: String,
        emma: String,
    }

    fn fixture() -> Fixture {
        let library = LibraryService::new(LoanPolicy::default());
        let user = library
            .register_user(NewUser {
                name: "Ada".to_string(),
                email: "ada@example.org".to_string(),
            })
            .unwrap()
            .id;
        let dune = library
            .add_book(new_book("Dune", "Frank Herbert", &["Science Fiction"], 2))
            .unwrap()
            .id;
        let hyperion = library
            .add_book(new_book("Hyperion", "Dan Simmons", &["Science Fiction"], 1))
            .unwrap()
            .id;
        let emma = library
            .add_book(new_book("Emma", "Jane Austen", &["Romance"], 1))
            .unwrap()
            .id;

        library.borrow(&user, &dune).unwrap();
        library.return_book(&user, &dune).unwrap();

        Fixture {
            library,
            user,
            dune,
            hyperion,
            emma,
        }
    }

    fn service(library: &LibraryService, model: ScriptedModel) -> RecommendationService {
        RecommendationService::new(
            Arc::new(FlowRunner::new(Arc::new(model), 1)),
            library.clone(),
        )
    }

    #[tokio::test]
    async fn test_model_picks_filtered_to_candidates() {
        let f = fixture();
        let reply = format!(
            r#"{{"recommendations": [
                {{"book_id": "{dune}", "reason": "already read"}},
                {{"book_id": "made-up", "reason": "hallucinated"}},
                {{"book_id": "{emma}", "reason": "A change of pace"}},
                {{"book_id": "{emma}", "reason": "again"}}
            ]}}"#,
            dune = f.dune,
            emma = f.emma
        );
        let recommender = service(&f.library, ScriptedModel::text(&[&reply]));

        let response = recommender.recommend(&f.user, None).await.unwrap();

        assert_eq!(response.source, FilterSource::Model);
        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.recommendations[0].book.id, f.emma);
        assert_eq!(response.recommendations[0].reason, "A change of pace");
    }

    #[tokio::test]
    async fn test_fallback_prefers_borrowed_genres() {
        let f = fixture();
        let recommender = service(&f.library, ScriptedModel::failing());

        let response = recommender.recommend(&f.user, Some(10)).await.unwrap();

        assert_eq!(response.source, FilterSource::Rules);
        let ids: Vec<&str> = response
            .recommendations
            .iter()
            .map(|r| r.book.id.as_str())
            .collect();
        assert_eq!(ids, vec![f.hyperion.as_str(), f.emma.as_str()]);
        assert_eq!(
            response.recommendations[0].reason,
            "Because you enjoyed Science Fiction books"
        );
        assert_eq!(
            response.recommendations[1].reason,
            "Highly rated in the catalog"
        );
    }

    #[tokio::test]
    async fn test_fallback_ranks_overlap_above_rating() {
        let f = fixture();
        let other = f
            .library
            .register_user(NewUser {
                name: "Grace".to_string(),
                email: "grace@example.org".to_string(),
            })
            .unwrap()
            .id;
        f.library.borrow(&other, &f.emma).unwrap();
        f.library.return_book(&other, &f.emma).unwrap();
        f.library
            .review(
                &other,
                &f.emma,
                NewReview {
                    rating: 5,
                    comment: "Perfect".to_string(),
                },
            )
            .unwrap();
        let recommender = service(&f.library, ScriptedModel::failing());

        let response = recommender.recommend(&f.user, Some(10)).await.unwrap();

        let ids: Vec<&str> = response
            .recommendations
            .iter()
            .map(|r| r.book.id.as_str())
            .collect();
        assert_eq!(ids, vec![f.hyperion.as_str(), f.emma.as_str()]);
    }

    #[tokio::test]
    async fn test_empty_model_reply_falls_back() {
        let f = fixture();
        let recommender = service(
            &f.library,
            ScriptedModel::text(&[r#"{"recommendations": []}"#]),
        );

        let response = recommender.recommend(&f.user, Some(1)).await.unwrap();

        assert_eq!(response.source, FilterSource::Rules);
        assert_eq!(response.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_skips_model() {
        let f = fixture();
        let other = f
            .library
            .register_user(NewUser {
                name: "Grace".to_string(),
                email: "grace@example.org".to_string(),
            })
            .unwrap()
            .id;
        f.library.borrow(&other, &f.hyperion).unwrap();
        f.library.borrow(&other, &f.emma).unwrap();
        f.library.borrow(&f.user, &f.dune).unwrap();

        let model = Arc::new(ScriptedModel::text(&[]));
        let recommender = RecommendationService::new(
            Arc::new(FlowRunner::new(model.clone(), 1)),
            f.library.clone(),
        );

        let response = recommender.recommend(&f.user, None).await.unwrap();

        assert!(response.recommendations.is_empty());
        assert_eq!(model.request_count(), 0);
    }
}
