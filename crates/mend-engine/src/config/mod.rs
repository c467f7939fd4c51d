pub mod loader;
pub mod schema;

pub use loader::{ConfigError, ConfigLoader};
pub use schema::{HARD_MAX_ATTEMPTS, MendConfig};
