pub mod category;
pub mod formatter;
pub mod protocol;

pub use category::ErrorCategory;
