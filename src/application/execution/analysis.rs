use crate::domain::exchange::ExchangeOrder;
use crate::domain::signal::Side;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Post-verification view of what actually executed.
#[derive(Debug, Clone)]
pub struct FillAnalysis {
    pub executed_price: Decimal,
    pub executed_volume: Decimal,
    pub executed_notional: Decimal,
    pub fee: Decimal,
    /// In [0, 1].
    pub fill_rate: f64,
    /// Signed percent vs the reference price; positive = worse than reference.
    pub slippage_percent: f64,
}

/// Signed slippage, normalized so that positive means worse than reference:
/// buys above reference and sells below reference are positive.
pub fn slippage_percent(side: Side, executed_price: Decimal, reference_price: Decimal) -> f64 {
    if reference_price <= Decimal::ZERO || executed_price <= Decimal::ZERO {
        return 0.0;
    }
    let raw = ((executed_price - reference_price) / reference_price * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0);
    match side {
        Side::Buy => raw,
        Side::Sell => -raw,
        Side::Hold => 0.0,
    }
}

/// Derive executed price, notional, fee, fill rate and slippage from a
/// verified exchange order.
///
/// Executed price resolution follows the settlement fields: for buys,
/// `locked / executed_volume` when funds are still reported locked, otherwise
/// `requested_notional / executed_volume`; for sells the order-reported price,
/// falling back to the reference mid.
pub fn analyze_fill(
    side: Side,
    order: &ExchangeOrder,
    requested_notional: Decimal,
    reference_price: Decimal,
) -> FillAnalysis {
    let executed_volume = order.executed_volume;

    let executed_price = match side {
        Side::Buy if executed_volume > Decimal::ZERO => {
            if order.locked > Decimal::ZERO {
                order.locked / executed_volume
            } else {
                requested_notional / executed_volume
            }
        }
        Side::Sell => order
            .price
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or(reference_price),
        _ => Decimal::ZERO,
    };

    let slippage = slippage_percent(side, executed_price, reference_price);

    FillAnalysis {
        executed_price,
        executed_volume,
        executed_notional: executed_price * executed_volume,
        fee: order.paid_fee,
        fill_rate: order.fill_rate(),
        slippage_percent: slippage,
    }
}
