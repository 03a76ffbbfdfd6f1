// Adapters implementing the app ports against the filesystem and remote services

pub mod local_tier_store;
pub mod secret_manager_client;
