use crate::{
    error::{ApiError, Result},
    llm::{ChatFlow, FlowRunner, Message, PromptTemplate, ToolBox},
    models::{ChatHistoryResponse, ChatMessage, ChatRequest, ChatResponse, ChatRole},
    services::chat_history::ChatSessionStore,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Serialize)]
pub struct LibrarianInput {
    pub message: String,
    pub today: String,
}

/// Free-text librarian chat with catalog tools.
pub struct LibrarianChat;

impl ChatFlow for LibrarianChat {
    type Input = LibrarianInput;
    type Output = String;

    fn name(&self) -> &'static str {
        "librarian_chat"
    }

    fn system_template(&self) -> PromptTemplate {
        PromptTemplate::new(
            "You are the assistant of a digital lending library. Today is {{today}}. \
             Use the catalog tools to look up books before recommending them and only \
             mention books that exist in the catalog. Keep answers short.",
        )
    }

    fn user_template(&self) -> PromptTemplate {
        PromptTemplate::new("{{message}}")
    }

    fn structured(&self) -> bool {
        false
    }

    fn temperature(&self) -> Option<f32> {
        Some(0.7)
    }

    fn parse_output(&self, content: &str) -> Result<String> {
        Ok(content.trim().to_string())
    }
}

pub struct AssistantService {
    runner: Arc<FlowRunner>,
    sessions: ChatSessionStore,
    tools: ToolBox,
}

impl AssistantService {
    pub fn new(runner: Arc<FlowRunner>, sessions: ChatSessionStore, tools: ToolBox) -> Self {
        Self {
            runner,
            sessions,
            tools,
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ApiError::InvalidInput("Message cannot be empty".to_string()));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ApiError::InvalidInput(format!(
                "Message is longer than {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let session_id = ChatSessionStore::resolve_id(request.session_id.as_deref())?;
        let history: Vec<Message> = self
            .sessions
            .recent(&session_id)
            .into_iter()
            .map(|m| match m.role {
                ChatRole::User => Message::user(m.content),
                ChatRole::Assistant => Message::assistant(m.content),
            })
            .collect();

        info!(
            "Chat session {}: {} prior messages",
            session_id,
            history.len()
        );

        let input = LibrarianInput {
            message: message.to_string(),
            today: Utc::now().format("%Y-%m-%d").to_string(),
        };
        let reply = self
            .runner
            .run_with(&LibrarianChat, &input, &history, &self.tools)
            .await?;

        // Only completed exchanges are stored, so a failed call leaves history untouched
        let messages = self.sessions.append(
            &session_id,
            vec![ChatMessage::user(message), ChatMessage::assistant(reply.clone())],
        )?;

        Ok(ChatResponse {
            session_id,
            reply,
            messages,
        })
    }

    pub fn history(&self, session_id: &str) -> Result<ChatHistoryResponse> {
        Ok(ChatHistoryResponse {
            session_id: session_id.to_string(),
            messages: self.sessions.history(session_id)?,
        })
    }

    pub fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.clear(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;

    fn service(model: Arc<ScriptedModel>) -> AssistantService {
        AssistantService::new(
            Arc::new(FlowRunner::new(model, 2)),
            ChatSessionStore::new(10, 60),
            ToolBox::new(),
        )
    }

    fn request(session_id: Option<&str>, message: &str) -> ChatRequest {
        ChatRequest {
            session_id: session_id.map(str::to_string),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_chat_carries_history_forward() {
        let model = Arc::new(ScriptedModel::text(&["Try Dune.", "It has 3 copies."]));
        let assistant = service(model.clone());

        let first = assistant
            .chat(request(None, "Any sci-fi?"))
            .await
            .unwrap();
        assert_eq!(first.reply, "Try Dune.");
        assert_eq!(first.messages.len(), 2);

        let second = assistant
            .chat(request(Some(&first.session_id), "Is it available?"))
            .await
            .unwrap();
        assert_eq!(second.messages.len(), 4);

        let requests = model.requests.lock().unwrap();
        // system, prior user, prior assistant, new user
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[2], Message::assistant("Try Dune."));
        assert!(requests[1].response_format.is_none());
    }

    #[tokio::test]
    async fn test_failed_reply_is_not_stored() {
        let assistant = service(Arc::new(ScriptedModel::failing()));

        let result = assistant.chat(request(Some("s1"), "Hello")).await;
        assert!(matches!(result, Err(ApiError::ExternalServiceError(_))));
        assert!(assistant.history("s1").is_err());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let model = Arc::new(ScriptedModel::text(&[]));
        let assistant = service(model.clone());

        let result = assistant.chat(request(None, "  ")).await;
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
        assert_eq!(model.request_count(), 0);
    }
}
