pub mod config;
pub mod handlers;
pub mod metrics;
pub mod observability;
pub mod realtime;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use observability::init_tracing;
pub use server::{AppState, SanctumServer, ServerBuilder, build_app};
