//! Wire models for the iac-deployer HTTP API

pub mod models;
