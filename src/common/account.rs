use serde::{Deserialize, Serialize};

use crate::common::{Word, hash};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Word,
    pub nonce: u64,
    #[serde(rename = "codeHash")]
    pub code_hash: Word,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: Word::zero(),
            nonce: 0,
            code_hash: Word::from_bytes(&hash::empty()),
        }
    }
}

impl Account {
    pub fn with_balance(balance: Word) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    pub fn has_code(&self) -> bool {
        !self.code_hash.is_zero() && self.code_hash != Word::from_bytes(&hash::empty())
    }

    /// EIP-161: no code, zero nonce and zero balance.
    pub fn is_empty(&self) -> bool {
        !self.has_code() && self.nonce == 0 && self.balance.is_zero()
    }
}
