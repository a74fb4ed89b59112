//! Startup data for the in-memory library.

use crate::{
    error::{ApiError, Result},
    models::{Book, UserProfile},
    services::LibraryState,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

impl SeedData {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ApiError::ConfigError(format!("Cannot read seed file {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Builds library state, deriving each book's available copies from the
    /// active loans recorded on the users.
    pub fn into_state(self) -> Result<LibraryState> {
        let mut on_loan: HashMap<&str, u32> = HashMap::new();
        for record in self.users.iter().flat_map(|u| u.active_loans()) {
            *on_loan.entry(record.book_id.as_str()).or_insert(0) += 1;
        }

        let mut state = LibraryState::default();
        for mut book in self.books {
            let loans = on_loan.get(book.id.as_str()).copied().unwrap_or(0);
            if loans > book.total_copies {
                warn!(
                    "Seed book {} has {} loans for {} copies, raising total",
                    book.id, loans, book.total_copies
                );
                book.total_copies = loans;
            }
            book.available_copies = book.total_copies - loans;
            book.review_count = book.reviews.len() as u32;
            book.rating = if book.reviews.is_empty() {
                0.0
            } else {
                book.reviews.iter().map(|r| r.rating as f32).sum::<f32>() / book.reviews.len() as f32
            };
            state.catalog.insert(book)?;
        }

        for user in self.users {
            if let Some(record) = user
                .borrowed
                .iter()
                .find(|r| state.catalog.get(&r.book_id).is_err())
            {
                return Err(ApiError::InvalidInput(format!(
                    "Seed user {} references unknown book {}",
                    user.id, record.book_id
                )));
            }
            state.users.insert(user)?;
        }

        info!(
            "Seeded {} books and {} users",
            state.catalog.len(),
            state.users.len()
        );
        Ok(state)
    }
}
