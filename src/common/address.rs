use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::{error::Error, hash::keccak256, word::Word};

#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    /// Reserved low address `0x00..00{n}`, as used by precompiles.
    pub const fn low(n: u8) -> Self {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| byte == &0)
    }

    /// CREATE: keccak256(rlp([sender, nonce]))[12:]
    pub fn create(&self, nonce: u64) -> Address {
        let nonce_bytes = nonce
            .to_be_bytes()
            .into_iter()
            .skip_while(|byte| byte == &0)
            .collect::<Vec<_>>();

        let mut nonce_rlp = Vec::with_capacity(9);
        match nonce_bytes.as_slice() {
            [byte] if *byte < 0x80 => nonce_rlp.push(*byte),
            bytes => {
                nonce_rlp.push(0x80u8 + bytes.len() as u8);
                nonce_rlp.extend_from_slice(bytes);
            }
        }

        let mut buffer = Vec::with_capacity(2 + 20 + nonce_rlp.len());
        buffer.push(0xc0u8 + (1 + self.0.len() + nonce_rlp.len()) as u8);
        buffer.push(0x80u8 + self.0.len() as u8);
        buffer.extend_from_slice(&self.0);
        buffer.extend_from_slice(&nonce_rlp);

        let hash = keccak256(&buffer);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash[12..32]);
        Address(addr)
    }

    /// CREATE2: keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12:]
    pub fn create2(&self, salt: &Word, init_code: &[u8]) -> Address {
        let mut buffer = Vec::with_capacity(1 + 20 + 32 + 32);
        buffer.push(0xffu8);
        buffer.extend_from_slice(&self.0);
        buffer.extend_from_slice(&salt.into_bytes());
        buffer.extend_from_slice(&keccak256(init_code));
        let hash = keccak256(&buffer);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash[12..32]);
        Address(addr)
    }

    pub fn as_word(&self) -> Word {
        self.into()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl From<&Address> for Word {
    fn from(value: &Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(&value.0);
        Word::from_bytes(&bytes)
    }
}

impl From<&Word> for Address {
    fn from(value: &Word) -> Self {
        let bytes: [u8; 32] = value.into_bytes();
        let mut ret = Address::default();
        ret.0[..].copy_from_slice(&bytes[12..]);
        ret
    }
}

impl From<[u8; 20]> for Address {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 20 {
            return Err(Error::InvalidAddress);
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(value);
        Ok(Address(bytes))
    }
}

impl TryFrom<&str> for Address {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != 40 && value.len() != 42 {
            return Err(Error::InvalidAddress);
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(value.trim_start_matches("0x"), &mut bytes)
            .map_err(|_| Error::InvalidAddress)?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex = hex::encode(self.0);
        let hex = format!("0x{hex}");
        serializer.serialize_str(&hex)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let hex: String = Deserialize::deserialize(deserializer)?;
        Address::try_from(hex.as_str()).map_err(|_| {
            D::Error::invalid_value(serde::de::Unexpected::Str(&hex), &"Invalid address")
        })
    }
}
