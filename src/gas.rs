//! Fork-versioned gas schedule and the per-frame gas meter.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{common::error::Error, interpreter::Exception};

/// Protocol version selecting a gas-schedule variant and the instruction set.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Fork {
    Byzantium,
    Constantinople,
    #[default]
    Petersburg,
    Istanbul,
    Berlin,
    London,
    Shanghai,
    Cancun,
}

impl Fork {
    pub const ALL: [Fork; 8] = [
        Fork::Byzantium,
        Fork::Constantinople,
        Fork::Petersburg,
        Fork::Istanbul,
        Fork::Berlin,
        Fork::London,
        Fork::Shanghai,
        Fork::Cancun,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Fork::Byzantium => "byzantium",
            Fork::Constantinople => "constantinople",
            Fork::Petersburg => "petersburg",
            Fork::Istanbul => "istanbul",
            Fork::Berlin => "berlin",
            Fork::London => "london",
            Fork::Shanghai => "shanghai",
            Fork::Cancun => "cancun",
        }
    }

    /// EIP-2929 warm/cold account and slot access.
    pub fn has_access_lists(&self) -> bool {
        *self >= Fork::Berlin
    }
}

impl std::fmt::Display for Fork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Fork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Fork::ALL
            .into_iter()
            .find(|fork| fork.name() == lower)
            .ok_or_else(|| Error::UnknownFork(s.to_string()))
    }
}

/// Cost categories consulted by the interpreter and the precompiles.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Cost {
    Zero,
    Base,
    VeryLow,
    Low,
    Mid,
    High,
    JumpDest,
    Exp,
    ExpByte,
    Keccak,
    KeccakWord,
    Copy,
    Memory,
    QuadCoeffDiv,
    Balance,
    ExtCodeSize,
    ExtCodeCopy,
    ExtCodeHash,
    BlockHash,
    Sload,
    SstoreSet,
    SstoreReset,
    SstoreDirty,
    SstoreClearRefund,
    SstoreSentry,
    WarmAccess,
    ColdAccountAccess,
    ColdSload,
    TransientAccess,
    Log,
    LogTopic,
    LogData,
    Create,
    CodeDeposit,
    InitCodeWord,
    Call,
    CallValue,
    CallStipend,
    NewAccount,
    SelfDestruct,
    SelfDestructRefund,
    EcRecover,
    Sha256,
    Sha256Word,
    Ripemd160,
    Ripemd160Word,
    Identity,
    IdentityWord,
    ModExpMin,
    ModExpDivisor,
    EcAdd,
    EcMul,
    EcPairing,
    EcPairingPair,
    Blake2Round,
}

/// Gas cost of `category` under `fork`.
pub const fn cost(fork: Fork, category: Cost) -> u64 {
    use Fork::*;

    let berlin = matches!(fork, Berlin | London | Shanghai | Cancun);
    let istanbul = matches!(fork, Istanbul) || berlin;

    match category {
        Cost::Zero => 0,
        Cost::Base => 2,
        Cost::VeryLow => 3,
        Cost::Low => 5,
        Cost::Mid => 8,
        Cost::High => 10,
        Cost::JumpDest => 1,
        Cost::Exp => 10,
        Cost::ExpByte => 50,
        Cost::Keccak => 30,
        Cost::KeccakWord => 6,
        Cost::Copy => 3,
        Cost::Memory => 3,
        Cost::QuadCoeffDiv => 512,

        // From Berlin these are paid through the warm/cold access cost.
        Cost::Balance if berlin => 0,
        Cost::Balance if istanbul => 700,
        Cost::Balance => 400,
        Cost::ExtCodeSize | Cost::ExtCodeCopy if berlin => 0,
        Cost::ExtCodeSize | Cost::ExtCodeCopy => 700,
        Cost::ExtCodeHash if berlin => 0,
        Cost::ExtCodeHash if istanbul => 700,
        Cost::ExtCodeHash => 400,
        Cost::BlockHash => 20,
        Cost::Sload if berlin => 0,
        Cost::Sload if istanbul => 800,
        Cost::Sload => 200,

        Cost::SstoreSet => 20_000,
        Cost::SstoreReset if berlin => 2_900,
        Cost::SstoreReset => 5_000,
        Cost::SstoreDirty if berlin => 100,
        Cost::SstoreDirty if istanbul => 800,
        Cost::SstoreDirty => 200,
        Cost::SstoreClearRefund => match fork {
            London | Shanghai | Cancun => 4_800,
            _ => 15_000,
        },
        Cost::SstoreSentry => 2_300,

        Cost::WarmAccess if berlin => 100,
        Cost::ColdAccountAccess if berlin => 2_600,
        Cost::ColdSload if berlin => 2_100,
        Cost::WarmAccess | Cost::ColdAccountAccess | Cost::ColdSload => 0,
        Cost::TransientAccess => 100,

        Cost::Log => 375,
        Cost::LogTopic => 375,
        Cost::LogData => 8,
        Cost::Create => 32_000,
        Cost::CodeDeposit => 200,
        Cost::InitCodeWord => match fork {
            Shanghai | Cancun => 2,
            _ => 0,
        },
        Cost::Call if berlin => 0,
        Cost::Call => 700,
        Cost::CallValue => 9_000,
        Cost::CallStipend => 2_300,
        Cost::NewAccount => 25_000,
        Cost::SelfDestruct => 5_000,
        Cost::SelfDestructRefund => match fork {
            London | Shanghai | Cancun => 0,
            _ => 24_000,
        },

        Cost::EcRecover => 3_000,
        Cost::Sha256 => 60,
        Cost::Sha256Word => 12,
        Cost::Ripemd160 => 600,
        Cost::Ripemd160Word => 120,
        Cost::Identity => 15,
        Cost::IdentityWord => 3,
        Cost::ModExpMin if berlin => 200,
        Cost::ModExpMin => 0,
        Cost::ModExpDivisor if berlin => 3,
        Cost::ModExpDivisor => 20,
        Cost::EcAdd if istanbul => 150,
        Cost::EcAdd => 500,
        Cost::EcMul if istanbul => 6_000,
        Cost::EcMul => 40_000,
        Cost::EcPairing if istanbul => 45_000,
        Cost::EcPairing => 100_000,
        Cost::EcPairingPair if istanbul => 34_000,
        Cost::EcPairingPair => 80_000,
        Cost::Blake2Round => 1,
    }
}

pub const STACK_LIMIT: usize = 1024;

pub const CALL_DEPTH_LIMIT: usize = 1024;

/// EIP-170
pub const MAX_CODE_SIZE: usize = 0x6000;

/// EIP-3860
pub const MAX_INITCODE_SIZE: usize = 2 * MAX_CODE_SIZE;

/// EIP-150: all but one 64th of the remaining gas may be forwarded.
pub fn all_but_one_64th(gas: u64) -> u64 {
    gas - gas / 64
}

/// Cost of a `len`-byte operand billed per 32-byte word.
pub fn per_word(fork: Fork, base: Cost, word: Cost, len: usize) -> u64 {
    let words = len.div_ceil(32) as u64;
    cost(fork, base).saturating_add(cost(fork, word).saturating_mul(words))
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Gas {
    pub limit: u64,
    pub used: u64,
}

impl Gas {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Hands back gas a sub-call did not consume.
    pub fn add(&mut self, gas: u64) {
        self.used = self.used.saturating_sub(gas);
    }

    pub fn sub(&mut self, gas: u64) -> Result<(), Exception> {
        if gas > self.remaining() {
            return Err(Exception::OutOfGas);
        }
        self.used += gas;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_ordering_and_names() {
        assert!(Fork::Byzantium < Fork::Istanbul);
        assert!(Fork::Cancun.has_access_lists());
        assert!(!Fork::Istanbul.has_access_lists());
        for fork in Fork::ALL {
            assert_eq!(fork.name().parse::<Fork>(), Ok(fork));
        }
        assert_eq!("Berlin".parse::<Fork>(), Ok(Fork::Berlin));
        assert!("frontier".parse::<Fork>().is_err());
        assert_eq!(Fork::default(), Fork::Petersburg);
    }

    #[test]
    fn test_curve_costs_per_fork() {
        assert_eq!(cost(Fork::Byzantium, Cost::EcMul), 40_000);
        assert_eq!(cost(Fork::Petersburg, Cost::EcMul), 40_000);
        assert_eq!(cost(Fork::Istanbul, Cost::EcMul), 6_000);
        assert_eq!(cost(Fork::Cancun, Cost::EcMul), 6_000);
        assert_eq!(cost(Fork::Petersburg, Cost::EcAdd), 500);
        assert_eq!(cost(Fork::Berlin, Cost::EcAdd), 150);
        assert_eq!(cost(Fork::Istanbul, Cost::EcPairingPair), 34_000);
    }

    #[test]
    fn test_storage_costs_per_fork() {
        assert_eq!(cost(Fork::Petersburg, Cost::Sload), 200);
        assert_eq!(cost(Fork::Istanbul, Cost::Sload), 800);
        assert_eq!(cost(Fork::Berlin, Cost::Sload), 0);
        assert_eq!(cost(Fork::Berlin, Cost::ColdSload), 2_100);
        assert_eq!(cost(Fork::Istanbul, Cost::ColdSload), 0);
        assert_eq!(cost(Fork::Berlin, Cost::SstoreClearRefund), 15_000);
        assert_eq!(cost(Fork::London, Cost::SstoreClearRefund), 4_800);
        assert_eq!(cost(Fork::London, Cost::SelfDestructRefund), 0);
    }

    #[test]
    fn test_gas_meter() {
        let mut gas = Gas::new(100);
        assert!(gas.sub(60).is_ok());
        assert_eq!(gas.remaining(), 40);
        assert_eq!(gas.sub(41), Err(Exception::OutOfGas));
        assert_eq!(gas.used, 60);
        gas.add(10);
        assert_eq!(gas.used, 50);
        assert_eq!(all_but_one_64th(6400), 6300);
        assert_eq!(per_word(Fork::Berlin, Cost::Sha256, Cost::Sha256Word, 33), 84);
    }
}
