pub mod assistant;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod healing;
pub mod runner;

pub use mend_common::formatter;
pub use mend_common::protocol;
pub use mend_common::ErrorCategory;
