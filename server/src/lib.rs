pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod validation;
pub mod ws;

pub use app::{build_router, AppState, Services};
pub use config::{RelayConfig, ServerConfig};
pub use error::PipelineError;
pub use protocol::{ClientMessage, ServerEvent};
