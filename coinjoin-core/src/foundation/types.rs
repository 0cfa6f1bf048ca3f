use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

pub type Hash32 = [u8; 32];

/// Content-derived round identifier: a BLAKE3 hash over the round's economic
/// parameters and both credential issuers' public parameters.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RoundId(Hash32);

impl RoundId {
    pub const fn new(value: Hash32) -> Self {
        Self(value)
    }

    pub fn as_hash(&self) -> &Hash32 {
        &self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::LowerHex for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str("0x")?;
        }
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for RoundId {
    type Err = crate::foundation::CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|err| crate::foundation::CoordinatorError::Message(format!("invalid round id hex: {err}")))?;
        let arr: Hash32 = bytes
            .try_into()
            .map_err(|_| crate::foundation::CoordinatorError::Message("round id must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for RoundId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for RoundId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = Hash32::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

impl AsRef<[u8]> for RoundId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for RoundId {
    type Target = Hash32;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Hash32> for RoundId {
    fn from(value: Hash32) -> Self {
        Self(value)
    }
}
