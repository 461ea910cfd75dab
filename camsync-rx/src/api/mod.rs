//! HTTP API handlers for camsync-rx

pub mod health;
pub mod progress;
pub mod settings;
pub mod upload;

pub use health::health_routes;
pub use progress::progress_routes;
pub use settings::settings_routes;
pub use upload::upload_routes;
