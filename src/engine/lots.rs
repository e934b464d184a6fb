// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::engine::error::EngineError;
use crate::models::HoldingPeriod;
use crate::utils::round_usd;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// An acquisition lot as tracked during replay. `acquired_date` stays keyed
/// to the creating transaction forever; internal transfers never re-key it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotState {
    pub created_txn_id: i64,
    pub acquired_date: DateTime<Utc>,
    pub total_btc: Decimal,
    pub remaining_btc: Decimal,
    pub cost_basis_usd: Decimal,
}

/// One lot fragment consumed by a disposing transaction. References the lot
/// by its creating transaction id; storage resolves that to a row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposalDraft {
    pub lot_txn_id: i64,
    pub transaction_id: i64,
    pub disposed_btc: Decimal,
    pub disposal_basis_usd: Decimal,
    pub proceeds_usd: Decimal,
    pub realized_gain_usd: Decimal,
    pub holding_period: HoldingPeriod,
}

/// Open-lot state threaded through a replay pass, kept in FIFO order:
/// `acquired_date` ascending, ties broken by `created_txn_id` ascending.
#[derive(Debug, Default)]
pub struct LotBook {
    lots: Vec<LotState>,
}

impl LotBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from carried-forward lots (the pre-cutoff snapshot of
    /// a partial recalculation).
    pub fn from_lots(mut lots: Vec<LotState>) -> Self {
        lots.sort_by(|a, b| {
            a.acquired_date
                .cmp(&b.acquired_date)
                .then(a.created_txn_id.cmp(&b.created_txn_id))
        });
        Self { lots }
    }

    /// Open a new acquisition lot. Replay feeds transactions in ascending
    /// `(timestamp, id)` order, so appending preserves FIFO order.
    pub fn open(
        &mut self,
        created_txn_id: i64,
        acquired_date: DateTime<Utc>,
        amount_btc: Decimal,
        cost_basis_usd: Decimal,
    ) {
        self.lots.push(LotState {
            created_txn_id,
            acquired_date,
            total_btc: amount_btc,
            remaining_btc: amount_btc,
            cost_basis_usd,
        });
    }

    pub fn total_open(&self) -> Decimal {
        self.lots.iter().map(|l| l.remaining_btc).sum()
    }

    pub fn lots(&self) -> &[LotState] {
        &self.lots
    }

    pub fn into_lots(self) -> Vec<LotState> {
        self.lots
    }

    /// Consume `required` BTC from open lots, oldest first, splitting the
    /// last lot touched when it holds more than is needed. Returns one
    /// fragment per lot touched. The whole disposal is rejected up front
    /// when open lots cannot cover it; partial application never happens.
    pub fn dispose(
        &mut self,
        txn_id: i64,
        disposed_at: DateTime<Utc>,
        required: Decimal,
        gross_proceeds_usd: Decimal,
    ) -> Result<Vec<DisposalDraft>, EngineError> {
        let available = self.total_open();
        if required > available {
            return Err(EngineError::InsufficientBtc {
                txn_id,
                required,
                available,
            });
        }

        let mut left = required;
        let mut fragments = Vec::new();
        for lot in self.lots.iter_mut() {
            if left <= Decimal::ZERO {
                break;
            }
            if lot.remaining_btc <= Decimal::ZERO {
                continue;
            }

            let consumed = left.min(lot.remaining_btc);
            let disposal_basis_usd =
                round_usd(lot.cost_basis_usd * consumed / lot.total_btc);
            let proceeds_usd = round_usd(gross_proceeds_usd * consumed / required);
            let holding_period = classify_holding(lot.acquired_date, disposed_at);

            lot.remaining_btc -= consumed;
            if lot.remaining_btc < Decimal::ZERO {
                return Err(EngineError::NegativeLot {
                    txn_id,
                    lot_txn_id: lot.created_txn_id,
                    remaining: lot.remaining_btc,
                });
            }
            left -= consumed;

            fragments.push(DisposalDraft {
                lot_txn_id: lot.created_txn_id,
                transaction_id: txn_id,
                disposed_btc: consumed,
                disposal_basis_usd,
                proceeds_usd,
                realized_gain_usd: proceeds_usd - disposal_basis_usd,
                holding_period,
            });
        }

        // Unreachable given the up-front availability check; kept as a
        // consistency tripwire.
        if left > Decimal::ZERO {
            return Err(EngineError::InsufficientBtc {
                txn_id,
                required,
                available,
            });
        }

        Ok(fragments)
    }
}

/// SHORT at 365 days or fewer between acquisition and disposal, LONG beyond.
fn classify_holding(acquired: DateTime<Utc>, disposed: DateTime<Utc>) -> HoldingPeriod {
    if (disposed - acquired).num_days() > 365 {
        HoldingPeriod::Long
    } else {
        HoldingPeriod::Short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_timestamp;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn partial_split_leaves_remainder_open() {
        let mut book = LotBook::new();
        book.open(1, ts("2024-01-01"), dec("1.0"), dec("20000"));

        let frags = book
            .dispose(2, ts("2024-03-01"), dec("0.3"), dec("9000"))
            .unwrap();
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].disposal_basis_usd, dec("6000.00"));
        assert_eq!(frags[0].realized_gain_usd, dec("3000.00"));
        assert_eq!(book.lots()[0].remaining_btc, dec("0.7"));
    }

    #[test]
    fn disposal_spans_lots_oldest_first() {
        let mut book = LotBook::new();
        book.open(1, ts("2024-01-01"), dec("0.4"), dec("10000"));
        book.open(2, ts("2024-02-01"), dec("1.0"), dec("30000"));

        let frags = book
            .dispose(3, ts("2024-06-01"), dec("0.6"), dec("24000"))
            .unwrap();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].lot_txn_id, 1);
        assert_eq!(frags[0].disposed_btc, dec("0.4"));
        assert_eq!(frags[1].lot_txn_id, 2);
        assert_eq!(frags[1].disposed_btc, dec("0.2"));
        // Older lot must be fully drained before the newer one is touched.
        assert_eq!(book.lots()[0].remaining_btc, Decimal::ZERO);
        assert_eq!(book.lots()[1].remaining_btc, dec("0.8"));
    }

    #[test]
    fn same_timestamp_lots_drain_by_creating_txn() {
        let mut book = LotBook::from_lots(vec![
            LotState {
                created_txn_id: 9,
                acquired_date: ts("2024-01-01"),
                total_btc: dec("1"),
                remaining_btc: dec("1"),
                cost_basis_usd: dec("40000"),
            },
            LotState {
                created_txn_id: 4,
                acquired_date: ts("2024-01-01"),
                total_btc: dec("1"),
                remaining_btc: dec("1"),
                cost_basis_usd: dec("30000"),
            },
        ]);
        let frags = book
            .dispose(10, ts("2024-02-01"), dec("0.5"), dec("25000"))
            .unwrap();
        assert_eq!(frags[0].lot_txn_id, 4);
    }

    #[test]
    fn insufficient_lots_fail_without_mutation() {
        let mut book = LotBook::new();
        book.open(1, ts("2024-01-01"), dec("0.5"), dec("10000"));

        let err = book
            .dispose(2, ts("2024-02-01"), dec("0.8"), dec("30000"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBtc { .. }));
        assert_eq!(book.lots()[0].remaining_btc, dec("0.5"));
    }

    #[test]
    fn holding_period_boundary_at_365_days() {
        let acquired = ts("2023-01-01");
        assert_eq!(
            classify_holding(acquired, ts("2024-01-01")),
            HoldingPeriod::Short
        );
        assert_eq!(
            classify_holding(acquired, ts("2024-01-02")),
            HoldingPeriod::Long
        );
    }

    #[test]
    fn fragment_proceeds_follow_consumed_share() {
        let mut book = LotBook::new();
        book.open(1, ts("2024-01-01"), dec("0.25"), dec("10000"));
        book.open(2, ts("2024-02-01"), dec("0.75"), dec("36000"));

        let frags = book
            .dispose(3, ts("2024-03-01"), dec("1.0"), dec("50000"))
            .unwrap();
        assert_eq!(frags[0].proceeds_usd, dec("12500.00"));
        assert_eq!(frags[1].proceeds_usd, dec("37500.00"));
        assert_eq!(frags[0].realized_gain_usd, dec("2500.00"));
        assert_eq!(frags[1].realized_gain_usd, dec("1500.00"));
    }
}
