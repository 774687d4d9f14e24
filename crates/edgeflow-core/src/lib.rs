//! # Edgeflow Core
//!
//! Foundational types for the Edgeflow streaming pipeline.
//!
//! This crate provides the data model shared by every pipeline component:
//!
//! - [`Value`]: runtime metadata values with JSON-compatible representation
//! - [`Record`]: the unit of data flowing through stages, the publisher and
//!   the subscription dispatcher
//!
//! Records carry an ordered metadata map (classifiers append derived fields
//! in insertion order) and an opaque payload shared by reference, so passing
//! a record between stages never copies the payload bytes.

pub mod record;
pub mod value;

pub use record::{FxIndexMap, Metadata, Record};
pub use value::Value;
