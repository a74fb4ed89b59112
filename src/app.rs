use crate::{
    config::Config,
    error::{ApiError, Result},
    handlers::{self, USER_ID_HEADER},
    llm::{FlowRunner, LanguageModel, LlmClient},
    models::*,
    routes::{api_routes, openapi_route},
    seed::SeedData,
    services::{
        catalog_toolbox, AssistantService, AvatarService, BookSummarizer, ChatSessionStore,
        LibraryService, LibraryState, LoanPolicy, RecommendationService, SearchAssistant,
    },
};
use actix_cors::Cors;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{middleware::Logger, web, App, Error, HttpServer};
use anyhow::Context;
use log::info;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Digital Library API",
        description = "Book catalog, lending and reviews with language-model assisted search, chat, summaries and recommendations"
    ),
    paths(
        handlers::health::health_check,
        handlers::books::list_books,
        handlers::books::list_genres,
        handlers::books::get_book,
        handlers::books::list_reviews,
        handlers::books::add_review,
        handlers::books::borrow_book,
        handlers::books::return_book,
        handlers::books::book_summary,
        handlers::account::register_user,
        handlers::account::dashboard,
        handlers::account::update_profile,
        handlers::account::generate_avatar,
        handlers::account::recommendations,
        handlers::ai::chat,
        handlers::ai::chat_history,
        handlers::ai::clear_chat,
        handlers::ai::suggestions,
        handlers::ai::natural_search,
        handlers::admin::stats,
        handlers::admin::add_book,
        handlers::admin::update_book,
        handlers::admin::delete_book,
        handlers::admin::list_users,
        handlers::admin::set_role,
        handlers::admin::overdue_loans,
    ),
    components(schemas(
        Book, BookUpdate, NewBook, NewReview, Review, BookPage, SearchFilters, SortOrder,
        UserProfile, UserRole, BorrowRecord, BorrowStatus, NewUser, ProfileUpdate, RoleUpdate,
        Dashboard, DashboardCounts, LoanView, OverdueLoan, LibraryStats,
        ChatMessage, ChatRole, ChatRequest, ChatResponse, ChatHistoryResponse,
        SuggestionRequest, SuggestionResponse, NaturalSearchRequest, NaturalSearchResponse,
        FilterSource, AvatarRequest, AvatarResponse, BookSummary, Recommendation,
        RecommendationResponse, HealthResponse, ErrorResponse,
    )),
    modifiers(&UserIdHeader),
    tags(
        (name = "Health", description = "Service status"),
        (name = "Books", description = "Catalog browsing and reviews"),
        (name = "Circulation", description = "Borrowing and returning"),
        (name = "Users", description = "Registration and member dashboards"),
        (name = "Assistant", description = "Language-model backed features"),
        (name = "Admin", description = "Catalog and member management"),
    )
)]
pub struct ApiDoc;

struct UserIdHeader;

impl Modify for UserIdHeader {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "user_id",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(USER_ID_HEADER))),
            );
        }
    }
}

/// Shared services handed to every worker.
#[derive(Clone)]
pub struct AppServices {
    pub library: web::Data<LibraryService>,
    pub assistant: web::Data<AssistantService>,
    pub search: web::Data<SearchAssistant>,
    pub summarizer: web::Data<BookSummarizer>,
    pub avatars: web::Data<AvatarService>,
    pub recommendations: web::Data<RecommendationService>,
    sessions: ChatSessionStore,
}

impl AppServices {
    pub fn new(config: &Config, library: LibraryService, model: Arc<dyn LanguageModel>) -> Self {
        let runner = Arc::new(FlowRunner::new(model, config.llm_max_tool_rounds));
        let sessions =
            ChatSessionStore::new(config.chat_history_limit, config.chat_session_ttl_secs);

        Self {
            assistant: web::Data::new(AssistantService::new(
                runner.clone(),
                sessions.clone(),
                catalog_toolbox(library.clone()),
            )),
            search: web::Data::new(SearchAssistant::new(runner.clone(), library.clone())),
            summarizer: web::Data::new(BookSummarizer::new(
                runner.clone(),
                library.clone(),
                config.summary_cache_ttl_secs,
            )),
            avatars: web::Data::new(AvatarService::new(runner.clone(), library.clone())),
            recommendations: web::Data::new(RecommendationService::new(runner, library.clone())),
            library: web::Data::new(library),
            sessions,
        }
    }
}

pub fn create_app(
    services: AppServices,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let cors = Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header();

    App::new()
        .wrap(cors)
        .wrap(Logger::default())
        .app_data(web::JsonConfig::default().error_handler(|err, _req| {
            ApiError::InvalidInput(err.to_string()).into()
        }))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| {
            ApiError::InvalidInput(err.to_string()).into()
        }))
        .app_data(services.library)
        .app_data(services.assistant)
        .app_data(services.search)
        .app_data(services.summarizer)
        .app_data(services.avatars)
        .app_data(services.recommendations)
        .service(api_routes())
        .service(openapi_route())
}

/// Builds the library from the configured seed file, or empty without one.
pub fn load_library(config: &Config) -> Result<LibraryService> {
    let policy = LoanPolicy::from_config(config);
    let state = match &config.seed_path {
        Some(path) => SeedData::from_file(path)
            .and_then(SeedData::into_state)
            .with_context(|| format!("Failed to load seed data from {}", path))?,
        None => {
            info!("No seed file configured, starting with an empty catalog");
            LibraryState::default()
        }
    };
    Ok(LibraryService::with_state(state, policy))
}

pub struct Application {
    port: u16,
    host: String,
    config: Config,
}

impl Application {
    /// Create a new application instance
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.port,
            host: config.host.clone(),
            config: config.clone(),
        }
    }

    /// Build and run the server
    pub async fn run(&self) -> Result<()> {
        let bind_address = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&bind_address)?;
        info!("Starting server at http://{}", bind_address);

        self.run_with_listener(listener).await
    }

    /// Run the server with a specific TCP listener
    /// This is useful for testing where we want to use a random port
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let library = load_library(&self.config)?;
        let model = LlmClient::new(&self.config).context("Failed to initialize LLM client")?;
        let services = AppServices::new(&self.config, library, Arc::new(model));

        let sessions = services.sessions.clone();
        actix_web::rt::spawn(async move {
            let mut interval = actix_web::rt::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                sessions.purge_expired();
            }
        });

        HttpServer::new(move || create_app(services.clone()))
            .listen(listener)?
            .run()
            .await?;

        Ok(())
    }
}
