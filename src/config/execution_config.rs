use super::{env_bool, env_list, env_parse};
use anyhow::Result;
use rust_decimal::Decimal;

/// Strategy tags that always submit market orders (ultra-short-term family).
/// The list is deliberately explicit; momentum-flavored tags not named here go
/// through the reason-accumulation path.
const DEFAULT_MARKET_ORDER_STRATEGIES: &[&str] = &[
    "MEME_SCALPER",
    "VOLUME_SURGE",
    "ULTRA_SHORT_SCALPER",
    "MOMENTUM_SCALPER",
];

/// Order executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutionEnvConfig {
    /// When false every signal short-circuits into a simulated fill.
    pub trading_enabled: bool,
    /// Exchange minimum order notional in KRW.
    pub min_order_krw: Decimal,
    /// Taker fee rate, e.g. 0.0004 for 0.04%.
    pub fee_rate: Decimal,

    // Fill analysis thresholds
    pub slippage_warn_percent: f64,
    pub slippage_critical_percent: f64,
    /// Fill rate at or above which an order counts as filled.
    pub fill_threshold: f64,

    // Limit-order quick verification
    pub quick_check_attempts: u32,
    pub quick_check_delay_ms: u64,

    // Market-order verification polling
    pub verify_max_attempts: u32,
    pub verify_initial_delay_ms: u64,
    pub verify_max_delay_ms: u64,

    // Order-type decision
    pub market_order_strategies: Vec<String>,
    pub high_volatility_percent: f64,
    pub high_confidence: f64,
    pub thin_liquidity_ratio: f64,
    pub imbalance_alignment: f64,

    // Market-condition gate limits
    pub max_spread_percent: f64,
    pub max_volatility_percent: f64,
    pub min_liquidity_ratio: f64,
}

impl ExecutionEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            trading_enabled: env_bool("TRADING_ENABLED", false)?,
            min_order_krw: env_parse("MIN_ORDER_AMOUNT_KRW", Decimal::from(5100))?,
            fee_rate: env_parse("FEE_RATE", Decimal::new(4, 4))?,
            slippage_warn_percent: env_parse("SLIPPAGE_WARN_PERCENT", 0.5)?,
            slippage_critical_percent: env_parse("SLIPPAGE_CRITICAL_PERCENT", 2.0)?,
            fill_threshold: env_parse("FILL_THRESHOLD", 0.9)?,
            quick_check_attempts: env_parse("QUICK_CHECK_ATTEMPTS", 2)?,
            quick_check_delay_ms: env_parse("QUICK_CHECK_DELAY_MS", 500)?,
            verify_max_attempts: env_parse("VERIFY_MAX_ATTEMPTS", 5)?,
            verify_initial_delay_ms: env_parse("VERIFY_INITIAL_DELAY_MS", 500)?,
            verify_max_delay_ms: env_parse("VERIFY_MAX_DELAY_MS", 2000)?,
            market_order_strategies: env_list(
                "MARKET_ORDER_STRATEGIES",
                DEFAULT_MARKET_ORDER_STRATEGIES,
            ),
            high_volatility_percent: env_parse("HIGH_VOLATILITY_PERCENT", 0.8)?,
            high_confidence: env_parse("HIGH_CONFIDENCE", 85.0)?,
            thin_liquidity_ratio: env_parse("THIN_LIQUIDITY_RATIO", 2.0)?,
            imbalance_alignment: env_parse("IMBALANCE_ALIGNMENT", 0.3)?,
            max_spread_percent: env_parse("MAX_SPREAD_PERCENT", 0.5)?,
            max_volatility_percent: env_parse("MAX_VOLATILITY_PERCENT", 3.0)?,
            min_liquidity_ratio: env_parse("MIN_LIQUIDITY_RATIO", 1.0)?,
        })
    }

    pub fn is_market_order_strategy(&self, strategy: &str) -> bool {
        self.market_order_strategies
            .iter()
            .any(|s| s.eq_ignore_ascii_case(strategy))
    }
}

impl Default for ExecutionEnvConfig {
    fn default() -> Self {
        Self {
            trading_enabled: true,
            min_order_krw: Decimal::from(5100),
            fee_rate: Decimal::new(4, 4),
            slippage_warn_percent: 0.5,
            slippage_critical_percent: 2.0,
            fill_threshold: 0.9,
            quick_check_attempts: 2,
            quick_check_delay_ms: 500,
            verify_max_attempts: 5,
            verify_initial_delay_ms: 500,
            verify_max_delay_ms: 2000,
            market_order_strategies: DEFAULT_MARKET_ORDER_STRATEGIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            high_volatility_percent: 0.8,
            high_confidence: 85.0,
            thin_liquidity_ratio: 2.0,
            imbalance_alignment: 0.3,
            max_spread_percent: 0.5,
            max_volatility_percent: 3.0,
            min_liquidity_ratio: 1.0,
        }
    }
}
