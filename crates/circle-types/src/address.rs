//! Ledger addresses and transaction hashes

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

/// 20-byte account address, displayed as lowercase `0x` hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

/// 32-byte transaction hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxHash(pub [u8; 32]);

static NEXT_UNIQUE: AtomicU64 = AtomicU64::new(1);

impl Address {
    /// The zero address
    pub const ZERO: Address = Address([0u8; 20]);

    /// Build an address whose low 8 bytes hold `n` (handy for fixtures)
    pub fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    /// A process-unique address for tests and local runs
    pub fn new_unique() -> Self {
        let n = NEXT_UNIQUE.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 20];
        bytes[0] = 0xaa;
        bytes[12..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    /// Shortened `0x1234...abcd` form for logs and listings
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl TxHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out).map_err(|e| format!("invalid hex '{}': {}", s, e))?;
    Ok(out)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex::<20>(s).map(Address)
    }
}

impl FromStr for TxHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex::<32>(s).map(TxHash)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = Address::from_low_u64(0x1234);
        let text = addr.to_string();
        assert_eq!(text, "0x0000000000000000000000000000000000001234");
        assert_eq!(text.parse::<Address>().unwrap(), addr);
        assert_eq!(addr.short(), "0x0000...1234");
    }

    #[test]
    fn test_address_parse_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz00000000000000000000000000000000001234"
            .parse::<Address>()
            .is_err());
        let upper: Address = "0X00000000000000000000000000000000000000AB".parse().unwrap();
        assert_eq!(upper, Address::from_low_u64(0xab));
    }

    #[test]
    fn test_unique_addresses_differ() {
        assert_ne!(Address::new_unique(), Address::new_unique());
    }

    #[test]
    fn test_address_serde_as_string() {
        let addr = Address::from_low_u64(7);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x0000000000000000000000000000000000000007\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
