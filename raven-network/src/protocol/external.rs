/// A Tokio codec that transforms an `AsyncRead` into a `Stream` of `Message`s.
pub mod codec;
/// An enum of all supported Raven message types.
pub mod message;
/// Newtype wrappers for primitive types.
pub mod types;

/// The 12-byte command field of the message header.
mod command;
/// Inventory items.
mod inv;

pub use codec::Codec;
pub use command::Command;
pub use inv::InventoryHash;
pub use message::{Message, Version};
