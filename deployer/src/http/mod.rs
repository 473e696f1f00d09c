//! HTTP client for collaborator services

pub mod client;
pub mod registry;
