pub mod backend;
pub mod config;
pub mod http;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod security;

#[cfg(test)]
mod testing;
