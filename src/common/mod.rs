use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod account;
pub mod address;
pub mod block;
pub mod error;
pub mod hash;
pub mod word;

pub use word::Word;

#[derive(Clone, Default, Eq, PartialEq)]
pub struct Hex(Vec<u8>);

impl Hex {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Hex {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Hex {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Hex {
    fn from(value: [u8; N]) -> Self {
        Self(value.to_vec())
    }
}

impl TryFrom<&str> for Hex {
    type Error = error::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(value.trim().trim_start_matches("0x"))
            .map_err(|_| error::Error::InvalidHex(value.to_string()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = hex::encode(&self.0);
        f.write_str(&hex)
    }
}

impl std::fmt::Display for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = hex::encode(&self.0);
        write!(f, "0x{hex}")
    }
}

impl Serialize for Hex {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex = format!("0x{}", hex::encode(&self.0));
        serializer.serialize_str(&hex)
    }
}

impl<'de> Deserialize<'de> for Hex {
    fn deserialize<D>(deserializer: D) -> Result<Hex, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let hex: String = Deserialize::deserialize(deserializer)?;
        let bin = hex::decode(hex.trim_start_matches("0x")).map_err(|_| {
            D::Error::invalid_value(serde::de::Unexpected::Str(&hex), &"Invalid hex string")
        })?;
        Ok(Hex(bin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_display_and_parse() {
        let hex = Hex::try_from("0x00ff10").expect("hex");
        assert_eq!(hex.as_bytes(), &[0x00, 0xff, 0x10]);
        assert_eq!(hex.to_string(), "0x00ff10");
        assert!(Hex::try_from("0xzz").is_err());
    }
}
