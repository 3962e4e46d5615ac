pub mod config;
pub mod db;
pub mod error;
pub mod translate;

pub use config::{AppConfig, ConfigError};
pub use error::TranslationError;
pub use translate::{TranslationResult, Translator};
