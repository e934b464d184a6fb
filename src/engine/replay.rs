// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::engine::action::{classify, TxAction};
use crate::engine::error::EngineError;
use crate::engine::lots::{DisposalDraft, LotBook, LotState};
use crate::engine::poster::{post_entries, EntryDraft};
use crate::engine::AccountDirectory;
use crate::models::{Currency, HoldingPeriod, Transaction};
use crate::utils::TransferFeePolicy;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy)]
pub struct ReplayPolicy {
    pub transfer_fee: TransferFeePolicy,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            transfer_fee: TransferFeePolicy::Taxable,
        }
    }
}

/// Transaction-level totals rolled up from a disposal's fragments. On a
/// disposal spanning holding periods, the oldest (first-consumed) fragment
/// wins; fragment rows stay the source of truth for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposalRollup {
    pub cost_basis_usd: Decimal,
    pub proceeds_usd: Decimal,
    pub realized_gain_usd: Decimal,
    pub holding_period: HoldingPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRollup {
    pub transaction_id: i64,
    /// None clears any stale computed fields on a non-disposing transaction.
    pub disposal: Option<DisposalRollup>,
}

/// Everything a replay pass derives. Pure data; storage drivers persist it.
#[derive(Debug, Default)]
pub struct Outcome {
    pub entries: Vec<(i64, Vec<EntryDraft>)>,
    pub lots: Vec<LotState>,
    pub disposals: Vec<DisposalDraft>,
    pub rollups: Vec<TxRollup>,
}

/// Replay a full transaction history from an empty book.
pub fn replay(
    dir: &AccountDirectory,
    txns: &[Transaction],
    policy: ReplayPolicy,
) -> Result<Outcome, EngineError> {
    replay_with_book(dir, LotBook::new(), txns, policy)
}

/// Deterministic scorched-earth replay: `txns` must already be sorted by
/// `(timestamp, id)` ascending. Each transaction runs Poster -> Lot Manager
/// -> Disposal Matcher in sequence; any failure aborts the whole pass.
/// Incremental patching is deliberately absent: a backdated acquisition can
/// retroactively change which lot every later disposal draws from.
pub fn replay_with_book(
    dir: &AccountDirectory,
    mut book: LotBook,
    txns: &[Transaction],
    policy: ReplayPolicy,
) -> Result<Outcome, EngineError> {
    let mut outcome = Outcome::default();

    for txn in txns {
        let action = classify(txn)?;
        let entries = post_entries(txn.id, &action, dir)?;
        outcome.entries.push((txn.id, entries));

        match &action {
            TxAction::Deposit {
                to,
                amount,
                cost_basis_usd,
                ..
            } if dir.is_holding_btc(*to) => {
                book.open(txn.id, txn.timestamp, *amount, *cost_basis_usd);
            }
            TxAction::Buy {
                to,
                amount_btc,
                cost_basis_usd,
                ..
            } if dir.is_holding_btc(*to) => {
                book.open(txn.id, txn.timestamp, *amount_btc, *cost_basis_usd);
            }
            _ => {}
        }

        let request = disposal_request(&action, dir, policy);
        let rollup = match request {
            Some((required, gross_proceeds)) if required > Decimal::ZERO => {
                let fragments = book.dispose(txn.id, txn.timestamp, required, gross_proceeds)?;
                let rollup = roll_up(&fragments);
                outcome.disposals.extend(fragments);
                rollup
            }
            _ => None,
        };
        outcome.rollups.push(TxRollup {
            transaction_id: txn.id,
            disposal: rollup,
        });
    }

    outcome.lots = book.into_lots();
    Ok(outcome)
}

/// Which transactions decrease BTC held: Sell (full amount), Withdrawal from
/// a BTC account (amount plus BTC fee), and the BTC fee of a Transfer when
/// policy makes it taxable. The transferred principal itself never disposes;
/// it stays inside the user's own accounts.
fn disposal_request(
    action: &TxAction,
    dir: &AccountDirectory,
    policy: ReplayPolicy,
) -> Option<(Decimal, Decimal)> {
    match action {
        TxAction::Sell {
            amount_btc,
            proceeds_usd,
            ..
        } => Some((*amount_btc, *proceeds_usd)),
        TxAction::Withdrawal {
            from,
            amount,
            proceeds_usd,
            fee,
        } if dir.is_holding_btc(*from) => {
            let btc_fee = fee
                .as_ref()
                .filter(|f| f.currency == Currency::Btc)
                .map(|f| f.amount)
                .unwrap_or(Decimal::ZERO);
            Some((*amount + btc_fee, *proceeds_usd))
        }
        TxAction::Transfer {
            fee_btc: Some(fee), ..
        } if policy.transfer_fee == TransferFeePolicy::Taxable => {
            Some((*fee, Decimal::ZERO))
        }
        _ => None,
    }
}

fn roll_up(fragments: &[DisposalDraft]) -> Option<DisposalRollup> {
    let first = fragments.first()?;
    Some(DisposalRollup {
        cost_basis_usd: fragments.iter().map(|f| f.disposal_basis_usd).sum(),
        proceeds_usd: fragments.iter().map(|f| f.proceeds_usd).sum(),
        realized_gain_usd: fragments.iter().map(|f| f.realized_gain_usd).sum(),
        holding_period: first.holding_period,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        ACCT_BANK, ACCT_COLD_STORAGE, ACCT_EXCHANGE_BTC, ACCT_EXCHANGE_USD, ACCT_EXTERNAL,
    };
    use crate::models::TxType;
    use crate::utils::parse_timestamp;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn txn(
        id: i64,
        tx_type: TxType,
        ts: &str,
        from: i64,
        to: i64,
        amount: &str,
    ) -> Transaction {
        Transaction {
            id,
            tx_type,
            timestamp: parse_timestamp(ts).unwrap(),
            from_account_id: from,
            to_account_id: to,
            amount: dec(amount),
            fee_amount: None,
            fee_currency: None,
            cost_basis_usd: None,
            proceeds_usd: None,
            realized_gain_usd: None,
            holding_period: None,
            purpose: None,
            source: None,
            is_locked: false,
            group_id: None,
        }
    }

    fn buy(id: i64, ts: &str, amount: &str, basis: &str) -> Transaction {
        let mut t = txn(id, TxType::Buy, ts, ACCT_BANK, ACCT_EXCHANGE_BTC, amount);
        t.cost_basis_usd = Some(dec(basis));
        t
    }

    fn sell(id: i64, ts: &str, amount: &str, proceeds: &str) -> Transaction {
        let mut t = txn(id, TxType::Sell, ts, ACCT_EXCHANGE_BTC, ACCT_EXCHANGE_USD, amount);
        t.proceeds_usd = Some(dec(proceeds));
        t
    }

    #[test]
    fn fifo_basic_scenario() {
        let dir = AccountDirectory::seeded();
        let txns = vec![
            buy(1, "2024-02-01", "1", "40000"),
            buy(2, "2024-03-01", "1", "50000"),
            sell(3, "2024-04-01", "1", "60000"),
        ];
        let outcome = replay(&dir, &txns, ReplayPolicy::default()).unwrap();

        assert_eq!(outcome.disposals.len(), 1);
        let d = &outcome.disposals[0];
        assert_eq!(d.lot_txn_id, 1);
        assert_eq!(d.disposal_basis_usd, dec("40000.00"));
        assert_eq!(d.realized_gain_usd, dec("20000.00"));
        assert_eq!(d.holding_period, HoldingPeriod::Short);

        let rollup = outcome.rollups[2].disposal.as_ref().unwrap();
        assert_eq!(rollup.realized_gain_usd, dec("20000.00"));
        assert_eq!(rollup.holding_period, HoldingPeriod::Short);
    }

    #[test]
    fn backdated_buy_reassigns_the_sell() {
        let dir = AccountDirectory::seeded();
        // Same history with a cheaper lot inserted before the rest; ids
        // intentionally out of order to mimic late submission.
        let mut txns = vec![
            buy(1, "2024-02-01", "1", "40000"),
            buy(2, "2024-03-01", "1", "50000"),
            sell(3, "2024-04-01", "1", "60000"),
            buy(4, "2024-01-15", "1", "30000"),
        ];
        txns.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        let outcome = replay(&dir, &txns, ReplayPolicy::default()).unwrap();

        let d = &outcome.disposals[0];
        assert_eq!(d.lot_txn_id, 4);
        assert_eq!(d.disposal_basis_usd, dec("30000.00"));
        assert_eq!(d.realized_gain_usd, dec("30000.00"));
    }

    #[test]
    fn deposit_to_bank_creates_no_lot() {
        let dir = AccountDirectory::seeded();
        let txns = vec![txn(
            1,
            TxType::Deposit,
            "2024-01-01",
            ACCT_EXTERNAL,
            ACCT_BANK,
            "5000",
        )];
        let outcome = replay(&dir, &txns, ReplayPolicy::default()).unwrap();
        assert!(outcome.lots.is_empty());
    }

    #[test]
    fn transfer_fee_disposal_honors_policy() {
        let dir = AccountDirectory::seeded();
        let mut transfer = txn(
            2,
            TxType::Transfer,
            "2024-02-01",
            ACCT_EXCHANGE_BTC,
            ACCT_COLD_STORAGE,
            "0.5",
        );
        transfer.fee_amount = Some(dec("0.001"));
        transfer.fee_currency = Some(Currency::Btc);
        let txns = vec![buy(1, "2024-01-01", "1", "40000"), transfer];

        let taxable = replay(&dir, &txns, ReplayPolicy::default()).unwrap();
        assert_eq!(taxable.disposals.len(), 1);
        assert_eq!(taxable.disposals[0].disposed_btc, dec("0.001"));
        assert_eq!(taxable.disposals[0].proceeds_usd, dec("0.00"));

        let exempt = replay(
            &dir,
            &txns,
            ReplayPolicy {
                transfer_fee: TransferFeePolicy::Exempt,
            },
        )
        .unwrap();
        assert!(exempt.disposals.is_empty());
        // Ledger entries still carry the fee either way.
        let (_, entries) = &exempt.entries[1];
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn withdrawal_disposes_amount_plus_btc_fee() {
        let dir = AccountDirectory::seeded();
        let mut wd = txn(
            2,
            TxType::Withdrawal,
            "2024-02-01",
            ACCT_EXCHANGE_BTC,
            ACCT_EXTERNAL,
            "0.2",
        );
        wd.fee_amount = Some(dec("0.0005"));
        wd.fee_currency = Some(Currency::Btc);
        wd.proceeds_usd = Some(dec("10000"));
        let txns = vec![buy(1, "2024-01-01", "1", "40000"), wd];

        let outcome = replay(&dir, &txns, ReplayPolicy::default()).unwrap();
        let total: Decimal = outcome.disposals.iter().map(|d| d.disposed_btc).sum();
        assert_eq!(total, dec("0.2005"));
    }
}
