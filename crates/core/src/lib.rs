pub mod alerts;
pub mod config;
pub mod error;
pub mod records;
pub mod templates;
pub mod types;

pub use config::AppConfig;
pub use error::{ReclaimError, ReclaimResult};
