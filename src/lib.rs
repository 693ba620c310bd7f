// src/lib.rs

pub mod config;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod indexer;
pub mod models;
pub mod repository;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod store;
pub mod trending;
pub mod utils;
pub mod writer;

// Re-export specific items for convenience if needed
pub use routes::create_router;
