//! Concept kinds, change notifications and configuration shared by the
//! CrlGraph crates.

pub mod config;
pub mod error;
pub mod node;
pub mod notification;
pub mod telemetry;
pub mod types;

pub use self::config::*;
pub use error::*;
pub use node::*;
pub use notification::*;
pub use telemetry::*;
pub use types::*;
