pub mod account;
pub mod admin;
pub mod ai;
pub mod books;
pub mod health;
pub mod identity;

pub use account::account_config;
pub use admin::admin_config;
pub use ai::ai_config;
pub use books::books_config;
pub use health::health_config;
pub use identity::{AdminUser, CurrentUser, USER_ID_HEADER};
