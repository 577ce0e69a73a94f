//! Data models for Fabric entities
//!
//! Records carry defaulted fields so loosely-typed payloads decode; free-form
//! type/status strings map onto closed enums with an `Unknown` fallback.

mod item;
mod job;
mod workspace;

pub use item::*;
pub use job::*;
pub use workspace::*;
