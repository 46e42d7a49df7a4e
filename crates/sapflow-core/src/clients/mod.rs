//! Client modules for external services

pub mod active_directory;
pub mod data_service;
pub mod memory;
pub mod openiap;

// Re-export all client types
pub use active_directory::{get_ad_user, DirectoryQuery};
pub use data_service::{fetch_first, DataService};
pub use memory::MemoryStore;
pub use openiap::OpenIapClient;
