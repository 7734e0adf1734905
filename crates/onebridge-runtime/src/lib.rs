//! onebridge runtime: configuration, logging and process lifecycle.
//!
//! This crate provides:
//! - Layered configuration loading and validation (`ConfigLoader`)
//! - Logging setup (`LoggingBuilder`)
//! - Runtime orchestration (`BridgeRuntime`): start the OneBot adapter,
//!   wait for Ctrl+C / SIGTERM or an adapter-initiated stop, shut down
//!
//! ```ignore
//! use onebridge_runtime::BridgeRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     BridgeRuntime::new()?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{BridgeConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{BridgeRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// The logging macros plus `instrument` and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
