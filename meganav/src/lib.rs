pub mod api;
pub mod config;

pub use api::{ApiError, ApiServer, AppState};
pub use config::AppConfig;
