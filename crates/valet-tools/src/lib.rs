//! Static tool catalog, schema-validating registry, and executor.

mod browser;
mod catalog;
mod executor;
mod google;
mod registry;

pub use browser::{BrowserClient, BrowserConfig};
pub use catalog::{catalog, engine_tool_definitions, ToolSpec};
pub use executor::{ExecutorConfig, ToolExecutor};
pub use google::{GoogleConfig, GoogleProvider};
pub use registry::{ResolvedCall, ToolCallError, ToolRegistry};
