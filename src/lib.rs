pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod security;

// Layered boundaries for application and infrastructure
pub mod app;
pub mod infra;
