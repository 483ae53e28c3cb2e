use crate::domain::signal::Side;
use crate::domain::trade::Trade;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;

/// Realized PnL of a sell, matched FIFO against open buy lots.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedPnl {
    pub amount: Decimal,
    pub percent: f64,
    /// Quantity actually matched against reconstructed lots.
    pub matched_quantity: Decimal,
    /// Weighted-average entry price of the matched lots.
    pub cost_basis: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct Lot {
    price: Decimal,
    quantity: Decimal,
}

/// Compute the realized PnL of selling `sell_quantity` at `sell_price` against
/// the open buy lots reconstructed from `history` (trades for one market and
/// simulation flag, oldest first).
///
/// Returns `None` when no open lot remains to match against, e.g. a position
/// that predates the recorded history.
pub fn realized_pnl_fifo(
    history: &[Trade],
    sell_price: Decimal,
    sell_quantity: Decimal,
) -> Option<RealizedPnl> {
    if sell_price <= Decimal::ZERO || sell_quantity <= Decimal::ZERO {
        return None;
    }

    // Replay the history to reconstruct the currently open lots.
    let mut lots: VecDeque<Lot> = VecDeque::new();
    for trade in history {
        match trade.side {
            Side::Buy => lots.push_back(Lot {
                price: trade.price,
                quantity: trade.quantity,
            }),
            Side::Sell => {
                let mut remaining = trade.quantity;
                while remaining > Decimal::ZERO {
                    let Some(front) = lots.front_mut() else {
                        break;
                    };
                    if front.quantity > remaining {
                        front.quantity -= remaining;
                        remaining = Decimal::ZERO;
                    } else {
                        remaining -= front.quantity;
                        lots.pop_front();
                    }
                }
            }
            Side::Hold => {}
        }
    }

    // Match the current sell against the oldest open lots.
    let mut matched = Decimal::ZERO;
    let mut cost = Decimal::ZERO;
    let mut remaining = sell_quantity;
    while remaining > Decimal::ZERO {
        let Some(front) = lots.front_mut() else {
            break;
        };
        let take = front.quantity.min(remaining);
        matched += take;
        cost += take * front.price;
        remaining -= take;
        if front.quantity > take {
            front.quantity -= take;
        } else {
            lots.pop_front();
        }
    }

    if matched <= Decimal::ZERO {
        return None;
    }

    let cost_basis = cost / matched;
    let amount = (sell_price - cost_basis) * matched;
    let percent = if cost_basis > Decimal::ZERO {
        ((sell_price - cost_basis) / cost_basis * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    };

    Some(RealizedPnl {
        amount,
        percent,
        matched_quantity: matched,
        cost_basis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Market;
    use crate::domain::trade::OrderType;
    use rust_decimal_macros::dec;

    fn trade(side: Side, price: Decimal, quantity: Decimal) -> Trade {
        Trade::new(
            "o",
            Market::parse("KRW-BTC").unwrap(),
            side,
            OrderType::Market,
            price,
            quantity,
            Decimal::ZERO,
        )
        .unwrap()
    }

    #[test]
    fn test_single_lot_profit() {
        let history = vec![trade(Side::Buy, dec!(200), dec!(5))];
        let pnl = realized_pnl_fifo(&history, dec!(210), dec!(5)).unwrap();
        assert_eq!(pnl.amount, dec!(50));
        assert!((pnl.percent - 5.0).abs() < 1e-9);
        assert_eq!(pnl.cost_basis, dec!(200));
    }

    #[test]
    fn test_oldest_lot_matches_first() {
        let history = vec![
            trade(Side::Buy, dec!(100), dec!(1)),
            trade(Side::Buy, dec!(200), dec!(1)),
        ];
        let pnl = realized_pnl_fifo(&history, dec!(150), dec!(1)).unwrap();
        // Matched against the 100 lot, not the 200 one
        assert_eq!(pnl.amount, dec!(50));
        assert_eq!(pnl.cost_basis, dec!(100));
    }

    #[test]
    fn test_prior_sells_consume_lots() {
        let history = vec![
            trade(Side::Buy, dec!(100), dec!(1)),
            trade(Side::Buy, dec!(200), dec!(1)),
            trade(Side::Sell, dec!(120), dec!(1)), // consumes the 100 lot
        ];
        let pnl = realized_pnl_fifo(&history, dec!(220), dec!(1)).unwrap();
        assert_eq!(pnl.cost_basis, dec!(200));
        assert_eq!(pnl.amount, dec!(20));
    }

    #[test]
    fn test_partial_lot_split() {
        let history = vec![trade(Side::Buy, dec!(100), dec!(2))];
        let pnl = realized_pnl_fifo(&history, dec!(110), dec!(0.5)).unwrap();
        assert_eq!(pnl.matched_quantity, dec!(0.5));
        assert_eq!(pnl.amount, dec!(5.0));
    }

    #[test]
    fn test_sell_larger_than_lots_matches_what_exists() {
        let history = vec![trade(Side::Buy, dec!(100), dec!(1))];
        let pnl = realized_pnl_fifo(&history, dec!(110), dec!(3)).unwrap();
        assert_eq!(pnl.matched_quantity, dec!(1));
        assert_eq!(pnl.amount, dec!(10));
    }

    #[test]
    fn test_no_history_yields_none() {
        assert!(realized_pnl_fifo(&[], dec!(110), dec!(1)).is_none());

        let exhausted = vec![
            trade(Side::Buy, dec!(100), dec!(1)),
            trade(Side::Sell, dec!(105), dec!(1)),
        ];
        assert!(realized_pnl_fifo(&exhausted, dec!(110), dec!(1)).is_none());
    }

    #[test]
    fn test_blended_cost_basis() {
        let history = vec![
            trade(Side::Buy, dec!(100), dec!(1)),
            trade(Side::Buy, dec!(300), dec!(1)),
        ];
        let pnl = realized_pnl_fifo(&history, dec!(250), dec!(2)).unwrap();
        assert_eq!(pnl.cost_basis, dec!(200));
        assert_eq!(pnl.amount, dec!(100));
        assert!((pnl.percent - 25.0).abs() < 1e-9);
    }
}
