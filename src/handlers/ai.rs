use crate::{
    error::ApiError,
    models::{
        ChatHistoryResponse, ChatRequest, ChatResponse, ErrorResponse, NaturalSearchRequest,
        NaturalSearchResponse, SuggestionRequest, SuggestionResponse,
    },
    services::{AssistantService, SearchAssistant},
};
use actix_web::{
    web::{self, Json, Path},
    HttpResponse,
};

pub fn ai_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/ai")
            .service(web::resource("/chat").route(web::post().to(chat)))
            .service(
                web::resource("/chat/{session_id}")
                    .route(web::get().to(chat_history))
                    .route(web::delete().to(clear_chat)),
            )
            .service(web::resource("/search/suggestions").route(web::post().to(suggestions)))
            .service(web::resource("/search").route(web::post().to(natural_search))),
    );
}

/// Talk to the library assistant
///
/// Omit `session_id` to start a new conversation. The assistant can look books up
/// in the catalog while answering.
#[utoipa::path(
    post,
    path = "/api/ai/chat",
    tag = "Assistant",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply and the session transcript", body = ChatResponse),
        (status = 400, description = "Empty or oversized message, or malformed session id", body = ErrorResponse),
        (status = 502, description = "Language model unavailable", body = ErrorResponse),
    )
)]
pub async fn chat(
    request: Json<ChatRequest>,
    assistant: web::Data<AssistantService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(assistant.chat(request.into_inner()).await?))
}

#[utoipa::path(
    get,
    path = "/api/ai/chat/{session_id}",
    tag = "Assistant",
    params(("session_id" = String, Path, description = "Chat session id")),
    responses(
        (status = 200, description = "Stored transcript", body = ChatHistoryResponse),
        (status = 404, description = "Unknown or expired session", body = ErrorResponse),
    )
)]
pub async fn chat_history(
    session_id: Path<String>,
    assistant: web::Data<AssistantService>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(assistant.history(&session_id)?))
}

#[utoipa::path(
    delete,
    path = "/api/ai/chat/{session_id}",
    tag = "Assistant",
    params(("session_id" = String, Path, description = "Chat session id")),
    responses(
        (status = 204, description = "Session removed"),
        (status = 404, description = "Unknown session", body = ErrorResponse),
    )
)]
pub async fn clear_chat(
    session_id: Path<String>,
    assistant: web::Data<AssistantService>,
) -> Result<HttpResponse, ApiError> {
    assistant.clear(&session_id)?;
    Ok(HttpResponse::NoContent().finish())
}

/// Search-as-you-type suggestions
#[utoipa::path(
    post,
    path = "/api/ai/search/suggestions",
    tag = "Assistant",
    request_body = SuggestionRequest,
    responses(
        (status = 200, description = "Up to five suggestions", body = SuggestionResponse),
        (status = 400, description = "Empty query", body = ErrorResponse),
        (status = 502, description = "Language model unavailable", body = ErrorResponse),
    )
)]
pub async fn suggestions(
    request: Json<SuggestionRequest>,
    search: web::Data<SearchAssistant>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(search.suggest(&request.query).await?))
}

/// Search the catalog with a plain-language request
///
/// The request is turned into structured filters by the language model. When the
/// model is unavailable a rule-based parser is used instead and `source` is `rules`.
#[utoipa::path(
    post,
    path = "/api/ai/search",
    tag = "Assistant",
    request_body = NaturalSearchRequest,
    responses(
        (status = 200, description = "Parsed filters and matching books", body = NaturalSearchResponse),
        (status = 400, description = "Empty query", body = ErrorResponse),
    )
)]
pub async fn natural_search(
    request: Json<NaturalSearchRequest>,
    search: web::Data<SearchAssistant>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(search.natural_search(request.into_inner()).await?))
}
