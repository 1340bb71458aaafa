pub mod job;
pub mod table;

pub use job::*;
pub use table::*;
