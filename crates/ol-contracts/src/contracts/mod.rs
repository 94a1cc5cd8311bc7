//! Built-in contracts.

pub mod config;
pub mod darc;

pub use config::update_config_contract;
pub use darc::darc_contract;
