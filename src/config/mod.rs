use crate::error::Result;
use serde::Deserialize;

/// Application settings.
///
/// Values come from built-in defaults, then an optional `config/default.toml`,
/// then `APP_*` environment variables (e.g. `APP_PORT`, `APP_LLM_API_KEY`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub llm_base_url: String,
    #[serde(default)]
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_image_model: String,
    pub llm_timeout_secs: u64,
    pub llm_max_retries: u32,
    pub llm_max_tool_rounds: usize,

    pub loan_period_days: i64,
    pub max_active_loans: usize,

    pub chat_history_limit: usize,
    pub chat_session_ttl_secs: u64,
    pub summary_cache_ttl_secs: u64,

    #[serde(default)]
    pub seed_path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8080)?
            .set_default("llm_base_url", "https://api.openai.com/v1")?
            .set_default("llm_model", "gpt-4o-mini")?
            .set_default("llm_image_model", "dall-e-3")?
            .set_default("llm_timeout_secs", 30)?
            .set_default("llm_max_retries", 2)?
            .set_default("llm_max_tool_rounds", 4)?
            .set_default("loan_period_days", 14)?
            .set_default("max_active_loans", 5)?
            .set_default("chat_history_limit", 40)?
            .set_default("chat_session_ttl_secs", 86400)?
            .set_default("summary_cache_ttl_secs", 86400)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("APP").try_parsing(true))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        use crate::error::ApiError;

        if self.loan_period_days <= 0 {
            return Err(ApiError::ConfigError(
                "loan_period_days must be positive".to_string(),
            ));
        }
        if self.max_active_loans == 0 {
            return Err(ApiError::ConfigError(
                "max_active_loans must be at least 1".to_string(),
            ));
        }
        if self.llm_max_retries > 10 {
            return Err(ApiError::ConfigError(
                "llm_max_retries must be at most 10".to_string(),
            ));
        }
        if self.chat_history_limit < 2 {
            return Err(ApiError::ConfigError(
                "chat_history_limit must hold at least one exchange".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_image_model: "dall-e-3".to_string(),
            llm_timeout_secs: 30,
            llm_max_retries: 2,
            llm_max_tool_rounds: 4,
            loan_period_days: 14,
            max_active_loans: 5,
            chat_history_limit: 40,
            chat_session_ttl_secs: 86400,
            summary_cache_ttl_secs: 86400,
            seed_path: None,
        }
    }
}
