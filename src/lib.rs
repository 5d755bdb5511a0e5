pub mod ai;
pub mod api;
pub mod board;
pub mod client;
pub mod config;
pub mod errors;
pub mod openapi;
pub mod prd;
pub mod rate_limit;
pub mod search;
pub mod server;
pub mod store;
pub mod ws;
