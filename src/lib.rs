pub mod config;
pub mod domain;
pub mod monitoring;
pub mod report;
pub mod server;
pub mod sp_api;
pub mod time;
