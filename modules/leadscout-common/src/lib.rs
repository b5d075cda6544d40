pub mod config;
pub mod error;
pub mod progress;
pub mod schedule;
pub mod types;

pub use config::Config;
pub use error::LeadScoutError;
pub use progress::*;
pub use schedule::*;
pub use types::*;
