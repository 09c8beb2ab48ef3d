// Library crate - exports the strategy core and its adapters

pub mod error;
pub mod trading_core;
pub mod types;
pub mod backfill;
pub mod notify;
pub mod api;
pub mod streams;

// Re-export commonly used types
pub use error::CoreError;
pub use types::AppState;
