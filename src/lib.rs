pub mod backoff;
pub mod config;
pub mod crawler;
pub mod error;
pub mod ratelimit;
pub mod remote;
pub mod sampler;
pub mod similar;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::Error;
pub use store::Store;
