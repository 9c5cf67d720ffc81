pub mod config;
pub mod discover;
