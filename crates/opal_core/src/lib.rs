pub mod config;
pub mod logging;

pub use config::{OpalConfig, ProviderSettings};
pub use logging::{init_logging, init_logging_to_dir};
