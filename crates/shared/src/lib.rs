pub mod cluster;
pub mod config;
pub mod error;
pub mod filter;
pub mod geo;
pub mod models;
pub mod query;
pub mod sync;
