pub mod config;
pub mod error;
pub mod types;
pub mod forwarder;
pub mod server;
pub mod metrics;

pub use error::RelayError;
pub type Result<T> = std::result::Result<T, RelayError>;
