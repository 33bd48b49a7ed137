//! Wire types for the target lifecycle registry.
//!
//! This crate contains the serde-serializable types exchanged with an event
//! source: target descriptions, the ordered notification stream, and the
//! option structs accepted by the registry. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Protocol-shaped**: Field names follow the DevTools `Target` domain
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Registry semantics are built on top of these types in `targetry`.

pub mod notification;
pub mod options;
pub mod types;

pub use notification::*;
pub use options::*;
pub use types::*;
