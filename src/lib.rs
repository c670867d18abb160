pub mod attempt;
pub mod config;
pub mod discover;
pub mod display;
pub mod errors;
pub mod probe;
pub mod record;
pub mod sweep;
pub mod types;
