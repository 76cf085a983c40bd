pub mod app;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod infra;
pub mod mmtp;
pub mod observability;
pub mod pipeline;
pub mod server;
