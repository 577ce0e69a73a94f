//! Fabric REST and OneLake API
//!
//! Each submodule exposes data-returning calls taking the client and a
//! bearer token, plus the `print_*` helpers the CLI uses.

pub mod client;
pub mod items;
pub mod jobs;
pub mod onelake;
pub mod roles;
pub mod workspaces;

pub use client::{ApiError, FabricClient};
