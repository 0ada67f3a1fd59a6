//! # Marketplace Monitoring
//!
//! Tracing setup shared by the marketplace binaries.
//!
//! ```rust,no_run
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // LOG_DESTINATION selects "console" or daily rotating files
//!     let _guard = monitoring::init_logging()?;
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_with, LogConfig, LogDestination, LoggingGuard};
