pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod services;
pub mod statement;
pub mod storage;

pub use config::TaskConfig;
pub use error::TaskError;
pub use models::*;
pub use services::*;
pub use storage::*;
