use std::ops::{BitAnd, BitOr, BitXor, Shl, Shr};

use primitive_types::U512;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

type U256 = primitive_types::U256;

/// 256-bit machine word, the unit of the operand stack.
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Word(U256);

impl Word {
    pub fn mul_modulo(&self, that: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let res = self.0.full_mul(that.0) % U512::from(modulo.0);
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }

    pub fn add_modulo(&self, that: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let res = (U512::from(self.0) + U512::from(that.0)) % U512::from(modulo.0);
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::Display for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::LowerHex for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Word {
    pub fn into_bytes(&self) -> [u8; 32] {
        self.0.to_big_endian()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Narrows to `u64`, `None` when the value does not fit.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0 > U256::from(u64::MAX) {
            None
        } else {
            Some(self.0.low_u64())
        }
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.to_u64().and_then(|value| usize::try_from(value).ok())
    }

    pub fn as_usize(&self) -> usize {
        self.to_usize().unwrap_or(usize::MAX)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let word = primitive_types::U256::from_big_endian(bytes);
        Self(word)
    }

    pub fn zero() -> Self {
        Self(primitive_types::U256::zero())
    }

    pub fn one() -> Self {
        Self(primitive_types::U256::one())
    }

    pub fn max() -> Self {
        Self(primitive_types::U256::max_value())
    }

    pub fn bit(&self, index: usize) -> bool {
        index < 256 && self.0.bit(index)
    }

    /// Number of significant bits.
    pub fn bits(&self) -> usize {
        self.0.bits()
    }

    /// Byte at `index` counted from the most significant end, zero past 31.
    pub fn byte(&self, index: usize) -> u8 {
        if index >= 32 {
            0
        } else {
            self.into_bytes()[index]
        }
    }

    pub fn is_negative(&self) -> bool {
        self.0.bit(255)
    }

    /// Two's complement negation.
    pub fn negate(&self) -> Self {
        let (ret, _) = (!self.0).overflowing_add(U256::one());
        Self(ret)
    }

    pub fn sign_extend(&self, byte: &Word) -> Self {
        if *byte >= Word::from(31u64) {
            return *self;
        }
        let bit = byte.as_usize() * 8 + 7;
        let mask = (U256::one() << (bit + 1)) - U256::one();
        if self.0.bit(bit) {
            Self(self.0 | !mask)
        } else {
            Self(self.0 & mask)
        }
    }

    pub fn pow(&self, exp: Self) -> Self {
        let (ret, _) = self.0.overflowing_pow(exp.0);
        Self(ret)
    }

    pub fn saturating_sub(&self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn checked_add(&self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(&self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn overflowing_add(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_add(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_mul(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_mul(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_sub(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_sub(rhs.0);
        (Self(word), flag)
    }

    pub fn from_hex(hex: &str) -> eyre::Result<Self> {
        let hex = hex.trim_start_matches("0x");
        let word = primitive_types::U256::from_str_radix(hex, 16);
        Ok(Self(
            word.map_err(|_| eyre::eyre!("Invalid U256: '{hex}'."))?,
        ))
    }
}

impl From<u8> for Word {
    fn from(value: u8) -> Self {
        Self(primitive_types::U256::from(value))
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self(primitive_types::U256::from(value))
    }
}

impl From<usize> for Word {
    fn from(value: usize) -> Self {
        Self(primitive_types::U256::from(value))
    }
}

impl From<u128> for Word {
    fn from(value: u128) -> Self {
        Self(primitive_types::U256::from(value))
    }
}

impl From<bool> for Word {
    fn from(value: bool) -> Self {
        if value { Word::one() } else { Word::zero() }
    }
}

impl std::ops::Div<Word> for Word {
    type Output = Word;

    fn div(self, rhs: Word) -> Self::Output {
        Word(self.0 / rhs.0)
    }
}

impl std::ops::Rem<Word> for Word {
    type Output = Word;

    fn rem(self, rhs: Word) -> Self::Output {
        Word(self.0 % rhs.0)
    }
}

impl BitAnd for Word {
    type Output = Word;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Word {
    type Output = Word;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitXor for Word {
    type Output = Word;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl std::ops::Not for Word {
    type Output = Word;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl Shl<usize> for Word {
    type Output = Word;

    fn shl(self, rhs: usize) -> Self::Output {
        if rhs >= 256 {
            return Word::zero();
        }
        Self(self.0 << rhs)
    }
}

impl Shr<usize> for Word {
    type Output = Word;

    fn shr(self, rhs: usize) -> Self::Output {
        if rhs >= 256 {
            return Word::zero();
        }
        Self(self.0 >> rhs)
    }
}

impl Serialize for Word {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D>(deserializer: D) -> Result<Word, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let hex: String = Deserialize::deserialize(deserializer)?;
        Word::from_hex(&hex).map_err(|_| {
            D::Error::invalid_value(serde::de::Unexpected::Str(&hex), &"Invalid U256 hex")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulo_ops() {
        let max = Word::max();
        assert_eq!(
            max.add_modulo(&Word::from(2u64), &Word::from(2u64)),
            Word::one()
        );
        assert_eq!(
            max.mul_modulo(&max, &Word::from(12u64)),
            Word::from(9u64)
        );
        assert_eq!(Word::one().add_modulo(&Word::one(), &Word::zero()), Word::zero());
    }

    #[test]
    fn test_sign_extend() {
        let x = Word::from(0xffu64);
        assert_eq!(x.sign_extend(&Word::zero()), Word::max());
        let x = Word::from(0x7fu64);
        assert_eq!(x.sign_extend(&Word::zero()), Word::from(0x7fu64));
        assert_eq!(x.sign_extend(&Word::from(40u64)), x);
    }

    #[test]
    fn test_negate_and_shifts() {
        assert_eq!(Word::one().negate(), Word::max());
        assert!(Word::max().is_negative());
        assert_eq!(Word::one() << 256, Word::zero());
        assert_eq!(Word::max() >> 255, Word::one());
    }

    #[test]
    fn test_narrowing() {
        assert_eq!(Word::from(42u64).to_u64(), Some(42));
        assert_eq!(Word::max().to_u64(), None);
    }
}
