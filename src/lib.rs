pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod humanize;
pub mod ingest;
pub mod jobs;
pub mod messaging;
pub mod observability;
pub mod queue;
pub mod server;
pub mod status;
pub mod storage;
pub mod worker;
