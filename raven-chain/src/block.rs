//! Blocks and block-related structures (heights, headers, hashes).

mod hash;
mod header;

pub mod merkle;

pub use hash::Hash;
pub use header::{Header, PowData};

use crate::{RavenDeserialize, RavenSerialize, SerializationError};

use serde::{Deserialize, Serialize};

/// The height of a block in the chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Height(pub u32);

impl RavenSerialize for Height {
    fn raven_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.raven_serialize(target)
    }
}

impl RavenDeserialize for Height {
    fn raven_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Height(u32::raven_deserialize(reader)?))
    }
}
