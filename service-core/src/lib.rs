//! service-core: Shared infrastructure for the resqflow services.
pub mod config;
pub mod error;
pub mod observability;
pub mod subscription;

pub use async_trait;
pub use mongodb;
pub use serde;
pub use tokio;
pub use tracing;
pub use validator;
