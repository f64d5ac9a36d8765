pub mod config;
pub mod error;
pub mod migration;
pub mod search;
pub mod server;
pub mod services;
pub mod store;
pub mod tools;
pub mod types;
