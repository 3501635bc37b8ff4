pub mod config;
pub mod error;
pub mod kafka;
pub mod partition;
pub mod processing;
pub mod serialization;
pub mod sink;
