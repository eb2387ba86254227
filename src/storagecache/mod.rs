// Storage cache management module.
// Provides the ARM client, resource types, and long-running operation handles for HPC caches.

pub mod client;
pub mod operation;
pub mod types;

pub use client::{API_VERSION, CachesClient, http_client};
pub use operation::{Operation, OperationKind, OperationStatus, PollingMethod};
pub use types::*;
