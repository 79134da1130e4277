pub mod config;
pub mod dedup;
pub mod embedding;
pub mod errors;
pub mod input;
pub mod llm_client;
pub mod models;
