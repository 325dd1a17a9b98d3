//! Serde helpers for token amounts.
//!
//! Amounts are `u128` base units and routinely exceed 2^53, so every external
//! representation (JSON payloads, SQLite columns) carries them as decimal
//! strings.

use serde::{de, Deserialize, Deserializer, Serializer};

/// Parse a decimal amount string.
pub fn parse_amount(s: &str) -> Result<u128, std::num::ParseIntError> {
    s.trim().parse::<u128>()
}

pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_amount(&s).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        amount: u128,
    }

    #[test]
    fn test_amount_as_string() {
        let w = Wrapper {
            amount: u128::MAX,
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, format!("{{\"amount\":\"{}\"}}", u128::MAX));
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(serde_json::from_str::<Wrapper>("{\"amount\":\"12a\"}").is_err());
        assert!(serde_json::from_str::<Wrapper>("{\"amount\":\"-1\"}").is_err());
    }
}
