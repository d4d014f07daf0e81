//! Chain parameters for the supported Ravencoin networks.

/// The furthest in the future a block timestamp is allowed to be, in seconds.
pub const BLOCK_MAX_TIME_DRIFT: u32 = 10 * 60;

/// An enum describing the possible network choices.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    /// The production mainnet.
    Mainnet,
    /// The testnet.
    Testnet,
    /// A local regression-test network.
    Regtest,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl Network {
    /// The default port to reach peers on this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Network::Mainnet => 8767,
            Network::Testnet => 18770,
            Network::Regtest => 18444,
        }
    }

    /// The wall-clock timestamp at which block headers switch from X16R to
    /// X16Rv2 proof-of-work.
    pub fn x16rv2_activation_time(&self) -> u32 {
        match self {
            Network::Mainnet => 1_569_945_600,
            Network::Testnet => 1_567_533_600,
            // Regtest never leaves the original algorithm.
            Network::Regtest => 3_582_830_167,
        }
    }

    /// The wall-clock timestamp at which block headers switch to KAWPOW and
    /// grow by a height, a 64-bit nonce, and a mix hash.
    pub fn kawpow_activation_time(&self) -> u32 {
        match self {
            Network::Mainnet => 1_588_788_000,
            Network::Testnet => 1_585_159_200,
            Network::Regtest => 3_582_830_167,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activations_are_ordered() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            assert!(network.x16rv2_activation_time() <= network.kawpow_activation_time());
        }
    }
}
