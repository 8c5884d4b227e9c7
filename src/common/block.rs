use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{address::Address, word::Word};

/// Block-level values visible to the block information instructions.
///
/// `BlockContext::default()` is the blank block used when the caller does
/// not supply one: block zero, zero timestamp and coinbase, chain id 1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    #[serde(rename = "gasLimit")]
    pub gas_limit: u64,
    /// DIFFICULTY before the merge, PREVRANDAO after.
    #[serde(rename = "mixHash")]
    pub prevrandao: Word,
    #[serde(rename = "baseFeePerGas", default)]
    pub base_fee: Word,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    #[serde(rename = "blobBaseFee", default)]
    pub blob_base_fee: Word,
    #[serde(rename = "blobVersionedHashes", default)]
    pub blob_hashes: Vec<Word>,
    /// Known ancestor hashes by block number, served to BLOCKHASH.
    #[serde(default)]
    pub hashes: BTreeMap<u64, Word>,
}

impl Default for BlockContext {
    fn default() -> Self {
        Self {
            number: 0,
            timestamp: 0,
            coinbase: Address::zero(),
            gas_limit: 30_000_000,
            prevrandao: Word::zero(),
            base_fee: Word::zero(),
            chain_id: 1,
            blob_base_fee: Word::one(),
            blob_hashes: Vec::new(),
            hashes: BTreeMap::new(),
        }
    }
}

impl BlockContext {
    /// Hash of one of the 256 most recent ancestors, zero otherwise.
    pub fn block_hash(&self, number: &Word) -> Word {
        let Some(number) = number.to_u64() else {
            return Word::zero();
        };
        if number >= self.number || self.number - number > 256 {
            return Word::zero();
        }
        self.hashes.get(&number).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_window() {
        let mut block = BlockContext {
            number: 300,
            ..Default::default()
        };
        block.hashes.insert(299, Word::from(0xaau64));
        block.hashes.insert(10, Word::from(0xbbu64));

        assert_eq!(block.block_hash(&Word::from(299u64)), Word::from(0xaau64));
        assert_eq!(block.block_hash(&Word::from(10u64)), Word::zero());
        assert_eq!(block.block_hash(&Word::from(300u64)), Word::zero());
        assert_eq!(block.block_hash(&Word::max()), Word::zero());
    }
}
