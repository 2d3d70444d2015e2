//! Types published to subscribers and returned to callers.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` with camelCase
//! field names so they can be written straight onto a JSON channel.

pub mod events;
