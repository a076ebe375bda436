//! I/O seams for the conductor: configuration, persistence, producers.

pub mod config;
pub mod file_store;
pub mod producer;
pub mod repository;
pub mod transcript;
