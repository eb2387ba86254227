// HPC cache pipeline check.
// Creates, reads, and deletes an Azure HPC Cache and reports the result to Azure Pipelines.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod runner;
pub mod storagecache;
