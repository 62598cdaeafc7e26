pub mod app;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod rule_loader;
pub mod scheduler;
pub mod seed;
pub mod stats;
pub mod writer;
