pub mod actions;
pub mod driver;
pub mod error;
pub mod runner;
pub mod utils;

// Re-export common items
pub use actions::{load_action_book, Action, ActionBook, Selector, Step};
pub use error::EngineError;
pub use runner::{ActionEngine, EngineState, ExecutionResult, Readiness};
pub use utils::config::EngineConfig;
