use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Quote currencies supported on the exchange, ordered by resolution priority.
/// KRW wins over USDT and BTC so that `BTC_KRW` and `KRW_BTC` both resolve to
/// the KRW market rather than a BTC-quoted one.
const QUOTE_CURRENCIES: &[&str] = &["KRW", "USDT", "BTC"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarketParseError {
    #[error("empty market identifier")]
    Empty,
    #[error("market '{0}' is not in QUOTE-BASE or BASE_QUOTE form")]
    Malformed(String),
    #[error("market '{0}' has no recognized quote currency")]
    UnknownQuote(String),
}

/// Canonical market identifier in `QUOTE-BASE` form (e.g. `KRW-BTC`).
///
/// Accepts `KRW-BTC`, `BTC_KRW` and `KRW_BTC` as input; all three normalize to
/// `KRW-BTC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Market(String);

impl Market {
    pub fn parse(input: &str) -> Result<Self, MarketParseError> {
        if input.trim().is_empty() {
            return Err(MarketParseError::Empty);
        }

        let upper = input.trim().to_ascii_uppercase();
        let parts: Vec<&str> = upper.split(['-', '_']).collect();
        let [first, second] = parts.as_slice() else {
            return Err(MarketParseError::Malformed(input.to_string()));
        };
        if first.is_empty() || second.is_empty() {
            return Err(MarketParseError::Malformed(input.to_string()));
        }

        for quote in QUOTE_CURRENCIES {
            if first == quote && second != quote {
                return Ok(Market(format!("{}-{}", quote, second)));
            }
            if second == quote && first != quote {
                return Ok(Market(format!("{}-{}", quote, first)));
            }
        }

        Err(MarketParseError::UnknownQuote(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quote currency, e.g. `KRW` for `KRW-BTC`.
    pub fn quote(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    /// Coin symbol (base currency), e.g. `BTC` for `KRW-BTC`.
    pub fn coin(&self) -> &str {
        self.0.split('-').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Market {
    type Err = MarketParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Market::parse(s)
    }
}

impl TryFrom<String> for Market {
    type Error = MarketParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Market::parse(&value)
    }
}

impl From<Market> for String {
    fn from(value: Market) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_form() {
        assert_eq!(Market::parse("KRW-BTC").unwrap().as_str(), "KRW-BTC");
        assert_eq!(Market::parse("KRW-ETH").unwrap().as_str(), "KRW-ETH");
        assert_eq!(Market::parse("USDT-BTC").unwrap().as_str(), "USDT-BTC");
    }

    #[test]
    fn test_parse_underscore_forms() {
        // Both orderings normalize to QUOTE-BASE
        assert_eq!(Market::parse("BTC_KRW").unwrap().as_str(), "KRW-BTC");
        assert_eq!(Market::parse("KRW_BTC").unwrap().as_str(), "KRW-BTC");
        assert_eq!(Market::parse("DOGE_KRW").unwrap().as_str(), "KRW-DOGE");
    }

    #[test]
    fn test_parse_lowercase_and_whitespace() {
        assert_eq!(Market::parse(" krw-btc ").unwrap().as_str(), "KRW-BTC");
        assert_eq!(Market::parse("btc_krw").unwrap().as_str(), "KRW-BTC");
    }

    #[test]
    fn test_coin_and_quote_extraction() {
        let market = Market::parse("KRW-BTC").unwrap();
        assert_eq!(market.coin(), "BTC");
        assert_eq!(market.quote(), "KRW");

        let market = Market::parse("XRP_KRW").unwrap();
        assert_eq!(market.coin(), "XRP");
        assert_eq!(market.quote(), "KRW");
    }

    #[test]
    fn test_krw_wins_over_btc_quote() {
        // BTC is also a quote currency, but KRW takes priority
        assert_eq!(Market::parse("BTC-KRW").unwrap().as_str(), "KRW-BTC");
    }

    #[test]
    fn test_btc_quoted_market() {
        assert_eq!(Market::parse("BTC-ETH").unwrap().as_str(), "BTC-ETH");
        assert_eq!(Market::parse("ETH_BTC").unwrap().as_str(), "BTC-ETH");
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Market::parse(""), Err(MarketParseError::Empty));
        assert_eq!(Market::parse("  "), Err(MarketParseError::Empty));
        assert!(matches!(
            Market::parse("KRWBTC"),
            Err(MarketParseError::Malformed(_))
        ));
        assert!(matches!(
            Market::parse("KRW-BTC-ETH"),
            Err(MarketParseError::Malformed(_))
        ));
        assert!(matches!(
            Market::parse("KRW-"),
            Err(MarketParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_quote() {
        assert!(matches!(
            Market::parse("ABC-XYZ"),
            Err(MarketParseError::UnknownQuote(_))
        ));
        assert!(matches!(
            Market::parse("KRW-KRW"),
            Err(MarketParseError::UnknownQuote(_))
        ));
    }

    #[test]
    fn test_serde_round_trip() {
        let market = Market::parse("KRW-BTC").unwrap();
        let json = serde_json::to_string(&market).unwrap();
        assert_eq!(json, "\"KRW-BTC\"");
        let back: Market = serde_json::from_str("\"btc_krw\"").unwrap();
        assert_eq!(back, market);
    }
}
