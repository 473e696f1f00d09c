//! Deployment storage

pub mod deployments;
