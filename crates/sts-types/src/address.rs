//! Checksummed EVM address and the well-known null-address sentinel.

use alloy_primitives::{Address, hex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An Ethereum address that always serializes with EIP-55 checksum encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ChecksumAddress(pub Address);

impl ChecksumAddress {
    /// The all-zeroes sentinel denoting "mint source" for issuance events that
    /// surface as `Transfer(from = null, to, value)` rather than a dedicated `Issued` event.
    pub const NULL: ChecksumAddress = ChecksumAddress(Address::ZERO);

    pub fn is_null(&self) -> bool {
        self.0 == Address::ZERO
    }
}

impl FromStr for ChecksumAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Address::from_str(s)?))
    }
}

impl Display for ChecksumAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl Serialize for ChecksumAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_checksum(None))
    }
}

impl<'de> Deserialize<'de> for ChecksumAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<ChecksumAddress> for Address {
    fn from(value: ChecksumAddress) -> Self {
        value.0
    }
}

impl From<Address> for ChecksumAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}
