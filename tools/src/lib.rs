pub mod common;
pub mod config;

pub use common::{init_tracing, load_normalizer, write_json};
pub use config::ToolConfig;
