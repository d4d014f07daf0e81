//! Core Ravencoin data structures and consensus-critical serialization.
//!
//! This crate contains the chain types shared by the networking stack: block
//! headers and hashes across all three proof-of-work eras, the partial merkle
//! tree used by SPV filtered blocks, raw transactions, and the wire
//! serialization traits everything else is written in terms of.

pub mod block;
pub mod compactint;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod work;

pub use serialization::{RavenDeserialize, RavenDeserializeInto, RavenSerialize, SerializationError};
