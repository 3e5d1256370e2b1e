pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::DatasetFetcher;
pub use app::pipelines::MarginPipeline;
pub use config::cli::LocalStorage;
pub use config::toml_config::ProjectConfig;
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use core::{etl::EtlEngine, scaffold::ProjectLayout};
pub use utils::error::{EtlError, Result};
