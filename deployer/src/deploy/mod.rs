//! Deployment execution

pub mod args;
pub mod fsm;
pub mod git;
pub mod handle;
pub mod logstream;
pub mod manager;
pub mod process;
pub mod registry_config;
pub mod tool;
pub mod worker;
