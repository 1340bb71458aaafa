pub mod client;
pub mod retry;
pub mod runner;

pub use client::*;
pub use retry::*;
pub use runner::*;
