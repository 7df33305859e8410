// src/utils/mod.rs
pub mod crypto;
pub mod serialization;
pub mod time;
