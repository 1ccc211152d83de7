pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod paths;
pub mod reconcile;
pub mod server;
pub mod state;
pub mod store;
pub mod utils;
