use crate::{
    error::{ApiError, Result},
    llm::{parse_json_output, ChatFlow, FlowRunner, PromptTemplate},
    models::{AvatarResponse, ProfileUpdate},
    services::LibraryService,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const MAX_STYLE_CHARS: usize = 200;
const DEFAULT_STYLE: &str = "friendly flat illustration";

#[derive(Serialize)]
pub struct AvatarPromptInput {
    pub name: String,
    pub style: String,
    pub favorite_genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvatarPromptOutput {
    pub prompt: String,
}

pub struct AvatarPrompt;

impl ChatFlow for AvatarPrompt {
    type Input = AvatarPromptInput;
    type Output = AvatarPromptOutput;

    fn name(&self) -> &'static str {
        "avatar_prompt"
    }

    fn system_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "You write prompts for an image model that draws profile avatars for library \
             members. No text, no real people. Reply with JSON: {\"prompt\": \"...\"}.",
        )
    }

    fn user_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "Member name: {{name}}\nStyle: {{style}}\nFavourite genres: {{favorite_genres}}",
        )
    }

    fn parse_output(&self, content: &str) -> Result<AvatarPromptOutput> {
        parse_json_output(content)
    }
}

pub struct AvatarService {
    runner: Arc<FlowRunner>,
    library: LibraryService,
}

impl AvatarService {
    pub fn new(runner: Arc<FlowRunner>, library: LibraryService) -> Self {
        Self { runner, library }
    }

    pub async fn generate(&self, user_id: &str, style: Option<String>) -> Result<AvatarResponse> {
        let style = style
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_STYLE.to_string());
        if style.chars().count() > MAX_STYLE_CHARS {
            return Err(ApiError::InvalidInput(format!(
                "Style is longer than {} characters",
                MAX_STYLE_CHARS
            )));
        }

        let user = self.library.get_user(user_id)?;
        let favorite_genres = self.library.inspect(|state| {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for record in &user.borrowed {
                if let Ok(book) = state.catalog.get(&record.book_id) {
                    for genre in &book.genres {
                        *counts.entry(genre.clone()).or_default() += 1;
                    }
                }
            }
            let mut genres: Vec<(String, usize)> = counts.into_iter().collect();
            genres.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            genres.into_iter().take(3).map(|(g, _)| g).collect::<Vec<_>>()
        })?;

        let output = self
            .runner
            .run(
                &AvatarPrompt,
                &AvatarPromptInput {
                    name: user.name.clone(),
                    style,
                    favorite_genres,
                },
            )
            .await?;
        let prompt = output.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(ApiError::ExternalServiceError(
                "Model returned an empty image prompt".to_string(),
            ));
        }

        let avatar_url = self.runner.model().generate_image(&prompt).await?;
        self.library.update_profile(
            user_id,
            ProfileUpdate {
                name: None,
                avatar_url: Some(avatar_url.clone()),
            },
        )?;

        info!("Generated avatar for user {}", user_id);
        Ok(AvatarResponse { avatar_url, prompt })
    }
}
