pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod portfolio;
pub mod store;
pub mod types;

pub use app::PortfolioApp;
pub use auth::{AuthError, SessionManager};
pub use error::AppError;
pub use portfolio::PortfolioClient;
pub use store::StoreError;
