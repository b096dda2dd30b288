pub mod app_state;
pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
mod ws_actor;

pub use app_state::{AppState, Bridges};
pub use backend::BackendHandle;
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::Session;
pub use sync_core;
