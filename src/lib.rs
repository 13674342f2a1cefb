// ABOUTME: Library root for dockwire, a Docker Engine API client.
// ABOUTME: The core lives in client; api wraps endpoints; the binary is in main.rs.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod types;
