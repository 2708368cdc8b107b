// src/feed/providers/mod.rs
pub mod twitter;
