pub mod config;
pub mod error;
pub mod exec;
pub mod files;
pub mod logging;
pub mod monitoring;
pub mod ssh;
pub mod state;
pub mod target;

pub use error::{AppError, AppResult};
pub use state::AppState;
pub use target::OperationTarget;
