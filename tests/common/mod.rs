#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use digital_library_api::app::AppServices;
use digital_library_api::config::Config;
use digital_library_api::error::{ApiError, Result};
use digital_library_api::llm::{AssistantMessage, CompletionRequest, LanguageModel};
use digital_library_api::models::{NewBook, NewUser, UserRole};
use digital_library_api::services::{LibraryService, LoanPolicy};

/// Language model double that replays canned text replies.
#[derive(Default)]
pub struct StubModel {
    replies: Mutex<VecDeque<String>>,
    pub image_url: Option<String>,
}

impl StubModel {
    pub fn with_replies(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            image_url: None,
        }
    }

    /// Fails every call, as an unreachable endpoint would.
    pub fn offline() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete(&self, _request: &CompletionRequest) -> Result<AssistantMessage> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .map(AssistantMessage::text)
            .ok_or_else(|| ApiError::ExternalServiceError("model offline".to_string()))
    }

    async fn generate_image(&self, _prompt: &str) -> Result<String> {
        self.image_url
            .clone()
            .ok_or_else(|| ApiError::ExternalServiceError("model offline".to_string()))
    }
}

pub struct Fixture {
    pub services: AppServices,
    pub library: LibraryService,
    pub admin_id: String,
    pub member_id: String,
    pub dune_id: String,
    pub earthsea_id: String,
}

pub fn book(title: &str, author: &str, genres: &[&str], copies: u32) -> NewBook {
    serde_json::from_value(serde_json::json!({
        "title": title,
        "author": author,
        "genres": genres,
        "total_copies": copies,
    }))
    .unwrap()
}

pub fn fixture(model: StubModel) -> Fixture {
    let config = Config::default();
    let library = LibraryService::new(LoanPolicy::from_config(&config));

    let admin_id = library
        .register_user(NewUser {
            name: "Avery Admin".to_string(),
            email: "admin@example.org".to_string(),
        })
        .unwrap()
        .id;
    library.set_role(&admin_id, UserRole::Admin).unwrap();

    let member_id = library
        .register_user(NewUser {
            name: "Morgan Member".to_string(),
            email: "morgan@example.org".to_string(),
        })
        .unwrap()
        .id;

    let dune_id = library
        .add_book(book("Dune", "Frank Herbert", &["Science Fiction"], 1))
        .unwrap()
        .id;
    let earthsea_id = library
        .add_book(book(
            "A Wizard of Earthsea",
            "Ursula K. Le Guin",
            &["Fantasy"],
            2,
        ))
        .unwrap()
        .id;

    let services = AppServices::new(&config, library.clone(), Arc::new(model));

    Fixture {
        services,
        library,
        admin_id,
        member_id,
        dune_id,
        earthsea_id,
    }
}
