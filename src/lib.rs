// Public API - checkers, configuration and error types
pub mod checker;
pub mod config;
pub mod error;

// Wire format and socket plumbing behind the ICMP checker
pub mod probe;

pub use checker::{CheckContext, Checker, Env, ProcessEnv, Registry};
pub use error::{AddressError, CheckError, ConfigError, ValidationError};
