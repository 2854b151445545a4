//! Payment tokens and decimal scaling

use crate::{Address, Amount};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A payment token the client knows how to display
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// Known payment tokens, looked up by address
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenRegistry {
    pub tokens: Vec<TokenInfo>,
}

/// Decimals assumed for tokens missing from the registry
pub const DEFAULT_DECIMALS: u8 = 6;

impl TokenRegistry {
    pub fn new(tokens: Vec<TokenInfo>) -> Self {
        Self { tokens }
    }

    pub fn get(&self, address: &Address) -> Option<&TokenInfo> {
        self.tokens.iter().find(|t| &t.address == address)
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<&TokenInfo> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Decimals for `address`, falling back to [`DEFAULT_DECIMALS`]
    pub fn decimals(&self, address: &Address) -> u8 {
        self.get(address).map(|t| t.decimals).unwrap_or(DEFAULT_DECIMALS)
    }

    pub fn symbol(&self, address: &Address) -> String {
        self.get(address)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| address.short())
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new(vec![
            TokenInfo {
                address: Address::from_low_u64(0x05dc),
                symbol: "USDC".to_string(),
                name: "USD Coin".to_string(),
                decimals: 6,
            },
            TokenInfo {
                address: Address::from_low_u64(0x05dd),
                symbol: "USDT".to_string(),
                name: "Tether USD".to_string(),
                decimals: 6,
            },
            TokenInfo {
                address: Address::from_low_u64(0x0da1),
                symbol: "DAI".to_string(),
                name: "Dai Stablecoin".to_string(),
                decimals: 18,
            },
        ])
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitsError {
    #[error("Invalid amount '{0}'")]
    Invalid(String),

    #[error("Amount '{value}' has more than {decimals} decimal places")]
    TooPrecise { value: String, decimals: u8 },

    #[error("Amount '{0}' is too large")]
    Overflow(String),
}

/// Render base units as a decimal string, trimming trailing zeros
/// (`1_500_000` with 6 decimals is `"1.5"`).
pub fn format_units(amount: Amount, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let digits = amount.to_string();
    let decimals = decimals as usize;
    let (whole, frac) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Parse a decimal string into base units
pub fn parse_units(value: &str, decimals: u8) -> Result<Amount, UnitsError> {
    let trimmed = value.trim();
    let invalid = || UnitsError::Invalid(value.to_string());
    let overflow = || UnitsError::Overflow(value.to_string());

    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooPrecise {
            value: value.to_string(),
            decimals,
        });
    }

    let unit = 10u128.checked_pow(decimals as u32).ok_or_else(overflow)?;
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_scaled: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded.parse().map_err(|_| overflow())?
    };

    whole
        .checked_mul(unit)
        .and_then(|w| w.checked_add(frac_scaled))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(100_000_000, 6), "100");
        assert_eq!(format_units(1_500_000, 6), "1.5");
        assert_eq!(format_units(1, 6), "0.000001");
        assert_eq!(format_units(0, 6), "0");
        assert_eq!(format_units(205, 0), "205");
        assert_eq!(format_units(1_000_000_000_000_000_000, 18), "1");
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("100", 6).unwrap(), 100_000_000);
        assert_eq!(parse_units("1.5", 6).unwrap(), 1_500_000);
        assert_eq!(parse_units(".25", 2).unwrap(), 25);
        assert_eq!(parse_units("5.000", 0).unwrap(), 5);
    }

    #[test]
    fn test_parse_units_errors() {
        assert!(matches!(parse_units("abc", 6), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("", 6), Err(UnitsError::Invalid(_))));
        assert!(matches!(
            parse_units("0.0000001", 6),
            Err(UnitsError::TooPrecise { .. })
        ));
        assert!(matches!(
            parse_units("999999999999999999999999999999999999999", 18),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TokenRegistry::default();
        let dai = registry.by_symbol("dai").unwrap();
        assert_eq!(dai.decimals, 18);
        assert_eq!(registry.decimals(&dai.address), 18);
        assert_eq!(registry.decimals(&Address::from_low_u64(42)), DEFAULT_DECIMALS);
    }
}
