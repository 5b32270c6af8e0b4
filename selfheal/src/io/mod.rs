//! Side-effecting adapters: collaborator clients and configuration.

pub mod collab;
pub mod config;
pub mod http;
