//! Raven network protocol types and serialization.

/// The external wire protocol: framing, commands, and typed messages.
pub mod external;
